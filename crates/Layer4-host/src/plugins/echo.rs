//! Echo 플러그인
//!
//! - 서비스: `echo` (params 그대로), `reverse` (`{text}` 뒤집기)
//! - 명령: `echo.announce` → 탭 제목 + 말풍선
//! - 이벤트: 구독한 이벤트를 `echo.<이벤트>`로 다시 발행

use async_trait::async_trait;
use eterm_core::{MessageType, Plugin, PluginContext};
use eterm_foundation::{Error, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info};

pub const ECHO_PLUGIN_ID: &str = "com.eterm.echo";

#[derive(Default)]
pub struct Echo {
    ctx: Mutex<Option<PluginContext>>,
}

impl Echo {
    fn context(&self) -> Result<PluginContext> {
        self.ctx
            .lock()
            .clone()
            .ok_or_else(|| Error::Plugin(format!("{} is not active", ECHO_PLUGIN_ID)))
    }
}

#[async_trait]
impl Plugin for Echo {
    async fn activate(&self, ctx: PluginContext) -> Result<()> {
        ctx.provide_service("echo", |params| async move { Ok(params) })
            .await?;
        ctx.provide_service("reverse", |params| async move {
            let text = params
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidParams("reverse requires 'text'".into()))?;
            Ok(json!(text.chars().rev().collect::<String>()))
        })
        .await?;

        *self.ctx.lock() = Some(ctx);
        info!("Echo plugin activated");
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        self.ctx.lock().take();
        info!("Echo plugin deactivated");
        Ok(())
    }

    async fn invoke_command(&self, command_id: &str, args: Value) -> Result<Value> {
        match command_id {
            "echo.announce" => {
                let ctx = self.context()?;
                let terminal_id = args.get("terminalId").and_then(Value::as_i64).unwrap_or(0);
                let text = args.get("text").and_then(Value::as_str).unwrap_or("echo");

                ctx.set_tab_title(terminal_id, text).await?;
                ctx.ui(
                    MessageType::ShowBubble,
                    json!({ "terminalId": terminal_id, "text": text }),
                )
                .await?;
                Ok(json!({ "announced": text }))
            }
            _ => Err(Error::NotImplemented(format!("command {}", command_id))),
        }
    }

    async fn handle_request(&self, request_type: &str, payload: Value) -> Result<Value> {
        match request_type {
            "ping" => Ok(json!({ "pong": payload })),
            _ => Err(Error::NotImplemented(format!("request {}", request_type))),
        }
    }

    async fn on_event(&self, event: &str, payload: Value) {
        let Ok(ctx) = self.context() else {
            return;
        };
        if let Err(e) = ctx.emit(&format!("echo.{}", event), payload).await {
            debug!("Echo re-emit of {} failed: {}", event, e);
        }
    }
}
