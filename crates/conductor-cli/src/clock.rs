//! Demo skill that reports the current time.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use conductor_core::error::ToolError;
use conductor_core::tools::{typed, TypedTool};
use conductor_core::{RunContext, Skill};
use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentTimeArgs {
    /// Offset from UTC in whole hours, between -12 and 14. Defaults to 0.
    #[serde(default)]
    pub utc_offset_hours: Option<i32>,
}

pub struct CurrentTimeTool;

#[async_trait]
impl TypedTool for CurrentTimeTool {
    type Args = CurrentTimeArgs;

    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, optionally shifted to a UTC offset"
    }

    fn status_message(&self) -> Option<String> {
        Some("Checking the clock...".into())
    }

    async fn call(&self, _ctx: &RunContext, args: CurrentTimeArgs) -> Result<String, ToolError> {
        let hours = args.utc_offset_hours.unwrap_or(0);
        if !(-12..=14).contains(&hours) {
            return Err(ToolError::retryable(format!(
                "utc_offset_hours must be between -12 and 14, got {hours}"
            )));
        }
        let offset = FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| ToolError::retryable(format!("invalid UTC offset {hours}")))?;
        let now = Utc::now().with_timezone(&offset);
        Ok(now.format("%A %Y-%m-%d %H:%M:%S %:z").to_string())
    }
}

/// The `Clock` skill shipped with the CLI.
pub fn skill() -> Skill {
    Skill::new(
        "Clock",
        "Answers questions about the current date and time in any UTC offset",
        "You tell the time. Call current_time with the offset the user asks for, \
         then call stop with a short answer that quotes the returned time.",
    )
    .with_status("Looking up the time...")
    .with_tool(typed(CurrentTimeTool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::error::ToolErrorKind;

    #[tokio::test]
    async fn reports_time_in_requested_offset() {
        let ctx = RunContext::detached("test");
        let out = CurrentTimeTool
            .call(&ctx, CurrentTimeArgs { utc_offset_hours: Some(9) })
            .await
            .unwrap();
        assert!(out.ends_with("+09:00"), "{out}");
    }

    #[tokio::test]
    async fn out_of_range_offset_is_retryable() {
        let ctx = RunContext::detached("test");
        let err = CurrentTimeTool
            .call(&ctx, CurrentTimeArgs { utc_offset_hours: Some(30) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::Retryable);
    }

    #[test]
    fn skill_exposes_the_tool() {
        let skill = skill();
        assert_eq!(skill.name, "Clock");
        assert_eq!(skill.tool_names(), ["current_time"]);
    }
}
