/// Delivery Layer
///
/// Everything that leaves the core goes through here:
///
/// - Domain events and their optional notifications, built together
/// - The downstream sink collaborator (persistence, rendering)
/// - The settings provider and the single notification decision

pub mod event;
pub mod settings;
pub mod sink;

pub use event::{Delivery, DomainEvent, EventCategory, EventOrigin, Notification};
pub use settings::{AppSettings, SettingsProvider, should_notify};
pub use sink::{ChannelSink, DownstreamSink, MemorySink, SinkMessage};
