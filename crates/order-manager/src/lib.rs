//! Bridge Order Manager
//!
//! The Order Manager sits between the UI-side caller and the broker adapter,
//! responsible for:
//! - **Submission Throttling**: Keeps the request rate under the broker's per-second cap
//! - **Lifecycle Tracking**: Drives every order from `Queued` to a terminal state
//! - **Reconciliation**: Binds asynchronous broker callbacks to local orders
//! - **Position Book**: Mirrors broker-reported holdings per instrument
//!
//! ## Architecture
//!
//! ```text
//! submit / modify / cancel
//!          │
//!          ▼
//! ┌────────────────────────────────────────────────┐
//! │            Order Lifecycle Manager             │
//! │  ┌──────────────────────────────────────────┐  │
//! │  │   Order Table (client id ⇄ broker id)    │  │
//! │  └───────────────┬──────────────────────────┘  │
//! │                  │ Queued                      │
//! │  ┌───────────────▼──────────────────────────┐  │
//! │  │   Submission Throttler                   │  │
//! │  │   - Sliding window, N grants per window  │  │
//! │  │   - Bounded wait, else Failed            │  │
//! │  └───────────────┬──────────────────────────┘  │
//! │                  │ Submitted                   │
//! └──────────────────┼─────────────────────────────┘
//!                    ▼
//!           BrokerExecutor::submit
//!                    │
//! Broker events ─────┴──► reconcile ──► Accepted / PartialFilled / Filled
//!                                       Cancelled / Rejected
//! Balance events ─────────► Position Book
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_order_manager::{NewOrder, OrderLifecycleManager, SubmissionThrottler};
//!
//! let throttler = Arc::new(SubmissionThrottler::new(&ThrottleConfig::default()));
//! let manager = Arc::new(OrderLifecycleManager::new(broker.clone(), throttler, config));
//! manager.spawn_event_loop(broker.event_stream());
//!
//! let id = manager
//!     .submit(NewOrder::limit("005930", Side::Buy, 10, dec!(70000)))
//!     .await?;
//! let done = manager.wait_for_terminal(&id, Duration::from_secs(30)).await?;
//! ```

pub mod error;
pub mod manager;
pub mod order;
pub mod position;
pub mod throttle;

// Re-export main types
pub use error::{Error, Result};
pub use manager::{OrderLifecycleManager, OrderManagerConfig};
pub use bridge_core::FailureCause;
pub use order::{ManagedOrder, NewOrder, OrderRef, OrderStats, OrderUpdate};
pub use position::PositionBook;
pub use throttle::{SubmissionThrottler, ThrottleConfig, ThrottleStats};
