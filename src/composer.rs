//! Message composition for employee and vendor notifications.

use handlebars::Handlebars;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::error::ComposeError;
use crate::export::{self, XLSX_CONTENT_TYPE};
use crate::grouping::{GroupingPolicy, VendorPayload, vendor_payloads};
use crate::notification::{Attachment, Notification};
use crate::roster::{EMAIL_COLUMN, RosterRow, RosterSet};
use crate::sanitize_name;

const INDIVIDUAL: &str = "individual";
const GROUP: &str = "group";

/// Content id the templates use for the header image
pub const BANNER_CID: &str = "banner";

/// What the administrator typed on the template page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTemplate {
    pub top: String,
    pub bottom: String,
    pub selected: Vec<String>,
}

#[derive(Serialize)]
struct Field<'a> {
    label: &'a str,
    value: String,
}

pub struct Composer {
    registry: Handlebars<'static>,
    image_dir: PathBuf,
    banner: Option<Attachment>,
    employee_subject: String,
    vendor_subject: String,
}

impl Composer {
    pub fn new(config: &AppConfig) -> Result<Self, ComposeError> {
        let mut registry = Handlebars::new();
        registry
            .register_template_string(INDIVIDUAL, include_str!("./templates/individual.hbs"))
            .map_err(|e| ComposeError::Template(e.to_string()))?;
        registry
            .register_template_string(GROUP, include_str!("./templates/group.hbs"))
            .map_err(|e| ComposeError::Template(e.to_string()))?;

        Ok(Self {
            registry,
            image_dir: config.image_dir.clone(),
            banner: config.banner_image.as_deref().and_then(load_banner),
            employee_subject: config.dispatch.employee_subject.clone(),
            vendor_subject: config.dispatch.vendor_subject.clone(),
        })
    }

    fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String, ComposeError> {
        self.registry
            .render(name, data)
            .map_err(|e| ComposeError::Template(e.to_string()))
    }

    /// One message for one employee row, listing the selected fields
    pub fn compose_individual(
        &self,
        row: &RosterRow,
        template: &MessageTemplate,
    ) -> Result<Notification, ComposeError> {
        let fields: Vec<Field<'_>> = template
            .selected
            .iter()
            .map(|label| Field {
                label,
                value: row.text(label).unwrap_or_default(),
            })
            .collect();

        let html_body = self.render(
            INDIVIDUAL,
            &json!({
                "top": template.top,
                "bottom": template.bottom,
                "fields": fields,
                "banner": self.banner.is_some(),
            }),
        )?;

        Ok(Notification {
            recipient: row.text(EMAIL_COLUMN).unwrap_or_default(),
            subject: self.employee_subject.clone(),
            html_body,
            attachments: self.banner.iter().cloned().collect(),
        })
    }

    /// One message per vendor with the route workbook and route images attached
    pub fn compose_group(
        &self,
        payload: &VendorPayload<'_>,
        template: &MessageTemplate,
    ) -> Result<Notification, ComposeError> {
        let html_body = self.render(
            GROUP,
            &json!({
                "top": template.top,
                "bottom": template.bottom,
                "banner": self.banner.is_some(),
            }),
        )?;

        let safe_name = sanitize_name(&payload.vendor);
        let workbook = export::vendor_workbook(payload, &template.selected)?;
        let mut attachments = vec![Attachment::new(
            format!("{}_Data.xlsx", safe_name),
            XLSX_CONTENT_TYPE,
            workbook,
        )];
        attachments.extend(route_images(&self.image_dir.join(&safe_name))?);
        attachments.extend(self.banner.iter().cloned());

        debug!(
            "Vendor {} has {} rows, {} routes, {} attachments",
            payload.vendor,
            payload.rows.len(),
            payload.routes.len(),
            attachments.len()
        );

        Ok(Notification {
            recipient: payload.recipients.join(", "),
            subject: self.vendor_subject.clone(),
            html_body,
            attachments,
        })
    }

    /// A message for every employee row. Rows without a usable address are
    /// kept so the dispatcher can count them as skipped.
    pub fn employee_notifications(
        &self,
        roster: &RosterSet,
        template: &MessageTemplate,
    ) -> Result<Vec<Notification>, ComposeError> {
        let notifications = roster
            .rows()
            .iter()
            .map(|row| self.compose_individual(row, template))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Composed {} employee notifications", notifications.len());
        Ok(notifications)
    }

    pub fn vendor_notifications(
        &self,
        roster: &RosterSet,
        policy: GroupingPolicy,
        template: &MessageTemplate,
    ) -> Result<Vec<Notification>, ComposeError> {
        let notifications = vendor_payloads(roster, policy)
            .iter()
            .map(|payload| self.compose_group(payload, template))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Composed {} vendor notifications", notifications.len());
        Ok(notifications)
    }
}

/// Read the banner once at startup. Mail still goes out without it when the file is unreadable.
fn load_banner(path: &Path) -> Option<Attachment> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("Banner image {} not loaded: {}", path.display(), e);
            return None;
        }
    };
    let content_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
            "image/jpeg"
        }
        Some(ext) if ext.eq_ignore_ascii_case("gif") => "image/gif",
        _ => "image/png",
    };
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "banner.png".to_string());
    Some(Attachment::inline(BANNER_CID, filename, content_type, data))
}

/// PNG files directly under `dir`, in file-name order. A missing directory yields none.
fn route_images(dir: &Path) -> Result<Vec<Attachment>, ComposeError> {
    if !dir.is_dir() {
        debug!("No image directory at {}", dir.display());
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(Attachment::new(filename, "image/png", fs::read(&path)?))
        })
        .collect()
}
