pub mod desktop_session;
pub mod file_event;
pub mod input_session;
pub mod record;

pub use desktop_session::DesktopSession;
pub use file_event::{FileEvent, FileEventKind};
pub use input_session::InputSession;
pub use record::{LocalRecord, MalformedRow, Stream, UnsyncedRows};
