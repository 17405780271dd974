mod desktop_sessions;
mod file_events;
mod input_sessions;
mod sync_queue;
