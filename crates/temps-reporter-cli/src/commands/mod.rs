pub mod parse_dsn;
pub mod send_event;

pub use parse_dsn::ParseDsnCommand;
pub use send_event::SendEventCommand;
