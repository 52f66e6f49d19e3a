//! Cash drawer domain: session lifecycle, signed movements and drawer totals.
//!
//! Deterministic and IO-free. Every amount is tracked per currency (USD, KHR)
//! with exact decimals.

pub mod event;
pub mod movement;
pub mod policy;
pub mod session;
pub mod totals;

pub use event::{
    CashEvent, MovementRecordedV1, SessionApprovedV1, SessionClosedV1, SessionOpenedV1,
    SessionReviewRequestedV1, SessionTakenOverV1,
};
pub use movement::{
    CashMovement, CashMovementStatus, CashMovementType, Direction, NewCashMovement,
    RecordCashMovement, plan_movement,
};
pub use policy::CashSessionPolicies;
pub use session::{
    ApproveSession, CashSession, CashSessionSnapshot, CashSessionStatus, CloseSession,
    OpenSession, RequestReview, SessionClosing, SessionCommand, SessionScope, TakeOverSession,
};
pub use totals::SessionTotals;
