pub mod banner;
pub mod bridge;
pub mod config;
pub mod consts;
pub mod conversation;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod logging;
pub mod prompts;
pub mod routing;
pub mod spinner;
pub mod stage;
pub mod thinker;
pub mod tools;
