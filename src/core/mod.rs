//! 核心编排层：avatar 档案、活动闸门、事件总线、渠道巡检与定时调度

pub mod activity;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod profile;
pub mod scheduler;

pub use activity::{is_active, is_active_at};
pub use error::AvatarError;
pub use events::{EventBus, InternalMessage, Subscriber, SubscriptionKey};
pub use orchestrator::{Orchestrator, SweepReport};
pub use profile::{load_profiles, AvatarProfile, LlmOverride, ScheduleWindow};
pub use scheduler::ChannelScheduler;
