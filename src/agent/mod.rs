//! 智能体：成员关系、移动规划、免费动作、决策规则与主循环

pub mod inventory;
pub mod membership;
pub mod movement;
pub mod policy;
pub mod profile;
pub mod runner;

pub use inventory::{run_free_actions, FreeActionContext, FreeActionReport};
pub use membership::{JoinOutcome, Membership, MembershipSettings};
pub use movement::{MoveKind, MovementPlanner, PlannedMove, RegionView};
pub use policy::{decide, Decision, DecisionContext, Rule};
pub use profile::{PolicyProfile, ProfileRegistry};
pub use runner::{AgentRunner, LoopTiming, RunnerDeps, TickOutcome};
