//! SNMP transport engine.
//!
//! Polls SNMP devices on a schedule, pushes attribute updates and RPC
//! calls to them, ingests their traps and forwards everything decoded to
//! the platform.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  SnmpTransportService                    │
//! │  sessions ─ scheduler ─ request contexts ─ executor      │
//! └──────┬───────────────┬───────────────────┬───────────────┘
//!        │               │                   │
//!   ┌────▼─────┐   ┌─────▼──────┐     ┌──────▼───────┐
//!   │ PduCodec │   │ AuthService│     │  Balancer    │
//!   │          │   │ + UsmTable │     │ (sharding)   │
//!   └────┬─────┘   └─────┬──────┘     └──────────────┘
//!        │               │
//!   ┌────▼───────────────▼─────┐
//!   │ SnmpClient               │
//!   │ (AsyncSnmpClient)        │
//!   └──────────────────────────┘
//! ```

pub mod auth;
pub mod balancing;
pub mod client;
pub mod codec;
pub mod executor;
mod lifecycle;
pub mod pdu;
pub mod processing;
pub mod request;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod snmp_client;
pub mod target;
pub mod usm;

pub use auth::SnmpAuthService;
pub use balancing::TransportBalancingService;
pub use client::{ClientEvent, Exchange, ResponseEvent, SnmpClient, TrapEvent};
pub use codec::PduCodec;
pub use executor::ResponseExecutor;
pub use pdu::{octet_string, Pdu, PduType, Value, VarBind};
pub use processing::{ResponseProcessing, TRAP_METHOD_NAME};
pub use request::RequestContext;
pub use scheduler::{ScheduledHandle, ScheduledTask, Scheduler, TokioScheduler};
pub use service::SnmpTransportService;
pub use session::DeviceSession;
pub use snmp_client::AsyncSnmpClient;
pub use target::{SecurityLevel, Target, TargetSecurity, TransportAddress};
pub use usm::{UsmUser, UsmUserKey, UsmUserTable};
