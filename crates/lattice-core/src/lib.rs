//! # Lattice Core
//!
//! Foundation of the Lattice bot runtime: the event model, the event bus, the
//! permission seam and the connection abstraction.
//!
//! ## Modules
//!
//! - **Events**: immutable [`Event`]s, [`Topic`] names, wildcard
//!   [`TopicPattern`]s and the static [`TopicRegistry`]
//! - **Bus**: prioritized, filterable publish/subscribe ([`EventBus`]) with
//!   per-handler isolation and a [`DispatchReport`] per publish
//! - **Guarded execution**: [`run_guarded`] runs user code on its own task with
//!   a deadline and a cancellation token
//! - **Permissions**: ordered [`PermissionLevel`]s read from a [`PermissionStore`]
//! - **Connection**: the [`Connection`] trait the outbound queue sends through
//!   and the runtime receives from
//!
//! ## Dispatch Flow
//!
//! ```text
//! ┌────────────┐  Event  ┌──────────┐  priority 10  ┌─────────┐ ┌─────────┐
//! │ Connection │────────▶│ EventBus │──────────────▶│ handler │ │ handler │
//! └────────────┘         └──────────┘               └─────────┘ └─────────┘
//!                              │        priority 0  ┌─────────┐
//!                              └───────────────────▶│ handler │
//!                                                   └─────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lattice_core::{Event, EventBus, Subscriber, topics};
//! use std::sync::Arc;
//!
//! let bus = EventBus::default();
//! bus.subscribe(Subscriber::new("message.*", |event: Arc<Event>| async move {
//!     println!("{:?}", event.text());
//!     Ok(())
//! }))?;
//!
//! let report = bus.publish(Event::new(topics::MESSAGE_GROUP, payload)).await;
//! assert!(report.is_clean());
//! ```

pub mod bus;
pub mod connection;
pub mod error;
pub mod event;
pub mod guard;
pub mod owner;
pub mod permission;

pub use bus::{
    BoxedEventHandler, DEFAULT_HANDLER_TIMEOUT, DispatchReport, EventBus, EventFilter,
    EventHandler, HandlerRecord, Subscriber, SubscriptionHandle, SubscriptionId,
};
pub use connection::{Ack, BoxedConnection, Connection, Envelope};
pub use error::{BoxError, BusError, BusResult, HandlerFault, SendError, SendResult};
pub use event::{Event, Topic, TopicPattern, TopicRegistry, topics};
pub use guard::{HandlerOutcome, run_guarded};
pub use owner::PluginId;
pub use permission::{BoxedPermissionStore, PermissionLevel, PermissionStore, StaticPermissionStore};

pub use async_trait::async_trait;
