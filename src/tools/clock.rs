//! Clock tool - tells the model the local weekday and time

use super::{ArgSchema, Tool, ToolContext, ToolError};
use async_trait::async_trait;
use chrono::Local;
use serde_json::{Map, Value};

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "what_day_and_time_is_it"
    }

    fn description(&self) -> String {
        "Tells the agent what day of the week and time it is".to_string()
    }

    fn parameters(&self) -> ArgSchema {
        ArgSchema::new()
    }

    async fn run(&self, _arguments: Map<String, Value>, _ctx: ToolContext) -> Result<String, ToolError> {
        Ok(Local::now().format("%A %H:%M:%S").to_string())
    }
}
