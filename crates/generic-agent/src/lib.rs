pub mod ag_ui;
pub mod agents;
pub mod identity;
pub mod items;
pub mod message;
pub mod model;
pub mod prompt_template;
pub mod providers;
pub mod session;
pub mod tool;
