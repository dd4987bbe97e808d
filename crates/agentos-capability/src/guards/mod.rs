//! Chat guards — the agent ↔ external boundary.
//!
//! Three independent checks protect outward-facing operations: the phase
//! gate (no `comm.*` outside execution phase), the attribution guard
//! (every external artifact names its origin and session), and the content
//! fence (external data is data, never instructions). All three reject via
//! explicit outcomes; none throw for routine denials.

pub mod attribution;
pub mod fence;
pub mod phase;

pub use attribution::{enforce_attribution, format_attribution};
pub use fence::{FencedContent, TrustTier, FENCE_TAG};
pub use phase::{ExecutionPhase, PhaseGate};
