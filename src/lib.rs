/*!
# rosterdesk

Transport roster administration: upload employee and vendor rosters, browse
them in the browser, and mail formatted roster notifications.

## Pipeline

upload → **loader** (CSV/Excel ingestion) → **store** (per-session roster) →
**query** (search / sort / columns) → **grouping** (route and vendor groups) →
**composer** (HTML bodies, spreadsheet and image attachments) →
**dispatch** (bounded-concurrency SMTP sends) → summary.

## Modules

- **roster**: row and cell types shared by every stage
- **loader**: file validation, CSV/Excel parsing, upload persistence
- **query**: substring search, stable single-column sort, column listing
- **grouping**: route/vendor grouping and vendor payloads
- **notification**: the message and attachment values handed to dispatch
- **export**: spreadsheet export of roster rows (`web` feature)
- **composer**: per-employee and per-vendor message composition (`web` feature)
- **mailer**: the transport seam and its SMTP implementation (`web` feature)
- **dispatch**: the batch sender (`web` feature)
- **store**: session-keyed roster storage with idle expiry
- **app**: routing, pages and middleware (`web` feature)
- **config**, **error**: configuration and error taxonomy

## REST API Endpoints

Mounted once per domain under `/employee` and `/vendor`:

- `GET /` and `POST /` - Roster page and file upload
- `GET /search?search=` - Filtered rows
- `GET /sort?column=&direction=` - Sorted rows
- `GET /columns` - Column names
- `GET /template` - Message template page
- `POST /send` - Compose and dispatch notifications
- `GET /export` - Download the stored roster as xlsx

At the root:

- `GET /` - Landing page
- `POST /session/clear` - Drop both rosters of the session and their saved files
*/

use lazy_static::lazy_static;
use regex::Regex;

pub mod config;
pub mod error;
pub mod grouping;
pub mod loader;
pub mod notification;
pub mod query;
pub mod roster;
pub mod store;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod composer;
#[cfg(feature = "web")]
pub mod dispatch;
#[cfg(feature = "web")]
pub mod export;
#[cfg(feature = "web")]
pub mod mailer;

pub use config::AppConfig;
pub use error::{ComposeError, ConfigError, FileError, QueryError, SendError};
pub use grouping::{Group, GroupingPolicy, VendorPayload};
pub use loader::{Ingestor, UploadedFile};
pub use notification::{Attachment, Notification};
pub use query::Direction;
pub use roster::{CellValue, RosterRow, RosterSet};

lazy_static! {
    static ref UNSAFE_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_-]").unwrap();
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`
pub fn sanitize_name(name: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(name, "_").into_owned()
}
