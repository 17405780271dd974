//! Session trackers fed by external probes of the desktop.

pub mod desktop;
pub mod input;

pub use desktop::{desktop_loop, DesktopTracker, WindowObservation, WindowSource, XdotoolSource};
pub use input::{input_loop, InputTracker, PresenceSource, XprintidleSource};
