//! Control surface — POST /rpc
//!
//! Request:  `{"id": "1", "method": "startCampaign", "params": {...}}`
//! Response: `{"type": "res", "id": "1", "ok": true, "payload": {...}}`
//! Error:    `{"type": "res", "id": "1", "ok": false, "error": {"code": "...", "message": "..."}}`

use axum::{extract::State, Json};
use serde_json::{json, Value};
use spinpost_core::{CampaignRequest, SpinpostError};
use spinpost_protocol::{Command, ReqFrame, ResFrame};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::app::AppState;

type HandlerResult = Result<Value, SpinpostError>;

/// POST /rpc — one typed command per request.
pub async fn rpc_handler(State(app): State<Arc<AppState>>, Json(raw): Json<Value>) -> Json<ResFrame> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let frame: ReqFrame = match serde_json::from_value(raw) {
        Ok(f) => f,
        Err(e) => {
            warn!(req_id = %id, error = %e, "malformed rpc frame");
            return Json(ResFrame::err(id, "INVALID_PARAMS", &format!("bad request: {e}")));
        }
    };
    Json(dispatch(&app, frame).await)
}

/// Route a parsed command to its handler.
pub async fn dispatch(app: &Arc<AppState>, frame: ReqFrame) -> ResFrame {
    let ReqFrame { id, command } = frame;
    let method = command.method();
    debug!(req_id = %id, method, "rpc");

    let result = match command {
        // ------------------------------------------------------------------
        // Campaigns
        // ------------------------------------------------------------------
        Command::StartCampaign {
            destinations,
            template,
            media_refs,
            pacing,
        } => {
            let request = CampaignRequest {
                destinations,
                template,
                media_refs,
                pacing,
            };
            handle_start(app, request).await
        }
        Command::StopCampaign => Ok(json!({ "stopping": app.campaigns.stop_campaign() })),
        Command::ResetStaleState => handle_reset(app),
        Command::DeleteCampaign { id: campaign_id } => app
            .campaigns
            .delete_campaign(&campaign_id)
            .map(|_| json!({ "deleted": campaign_id }))
            .map_err(SpinpostError::from),
        Command::GetStatus => handle_status(app),
        Command::ListCampaigns => handle_list_campaigns(app),

        // ------------------------------------------------------------------
        // Schedules
        // ------------------------------------------------------------------
        Command::AddSchedule(draft) => app
            .schedules
            .add(draft)
            .map_err(SpinpostError::from)
            .and_then(|s| Ok(serde_json::to_value(s)?)),
        Command::ListSchedules => app
            .schedules
            .list()
            .map_err(SpinpostError::from)
            .and_then(|all| Ok(json!({ "schedules": all }))),
        Command::DeleteSchedule { id: schedule_id } => app
            .schedules
            .delete(&schedule_id)
            .map(|_| json!({ "deleted": schedule_id }))
            .map_err(SpinpostError::from),

        // ------------------------------------------------------------------
        // Media
        // ------------------------------------------------------------------
        Command::UploadChunk(chunk) => app
            .uploads
            .accept_chunk(&chunk)
            .map_err(SpinpostError::from)
            .and_then(|p| Ok(serde_json::to_value(p)?)),
        Command::FinalizeUpload { transfer_id } => app
            .uploads
            .finalize(&transfer_id)
            .map_err(SpinpostError::from)
            .and_then(|meta| Ok(serde_json::to_value(meta)?)),
        Command::DeleteMedia { id: media_id } => app
            .archive
            .delete(&media_id)
            .map(|_| json!({ "deleted": media_id }))
            .map_err(SpinpostError::from),

        // ------------------------------------------------------------------
        // Entitlement
        // ------------------------------------------------------------------
        Command::GetEntitlement => handle_entitlement(app).await,
    };

    match result {
        Ok(payload) => ResFrame::ok(id, payload),
        Err(e) => {
            warn!(req_id = %id, method, code = e.code(), error = %e, "rpc failed");
            ResFrame::from_error(id, &e)
        }
    }
}

async fn handle_start(app: &Arc<AppState>, request: CampaignRequest) -> HandlerResult {
    let reply = app
        .campaigns
        .start_campaign(request)
        .await
        .map_err(SpinpostError::from)?;
    Ok(serde_json::to_value(reply)?)
}

fn handle_reset(app: &Arc<AppState>) -> HandlerResult {
    app.campaigns
        .reset_stale_state()
        .map_err(SpinpostError::from)?;
    Ok(json!({ "reset": true }))
}

fn handle_status(app: &Arc<AppState>) -> HandlerResult {
    let status = app.campaigns.status().map_err(SpinpostError::from)?;
    Ok(serde_json::to_value(status)?)
}

fn handle_list_campaigns(app: &Arc<AppState>) -> HandlerResult {
    let all = app
        .campaigns
        .list_campaigns()
        .map_err(SpinpostError::from)?;
    Ok(json!({ "campaigns": all }))
}

async fn handle_entitlement(app: &Arc<AppState>) -> HandlerResult {
    let state = app
        .campaigns
        .entitlement()
        .await
        .map_err(SpinpostError::from)?;
    Ok(json!({ "entitlement": state }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use serde_json::json;

    fn frame(value: Value) -> ReqFrame {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn status_on_fresh_state_is_idle() {
        let app = test_state();
        let res = dispatch(&app, frame(json!({ "id": "1", "method": "getStatus" }))).await;
        assert!(res.ok);
        let payload = res.payload.unwrap();
        assert_eq!(payload["done"], false);
        assert!(payload.get("campaignId").is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_invalid_params() {
        let app = test_state();
        let Json(res) = rpc_handler(
            State(app),
            Json(json!({ "id": "7", "method": "launchRockets" })),
        )
        .await;
        assert!(!res.ok);
        assert_eq!(res.id, "7");
        assert_eq!(res.error.unwrap().code, "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn delete_unknown_campaign_is_not_found() {
        let app = test_state();
        let res = dispatch(
            &app,
            frame(json!({ "id": "2", "method": "deleteCampaign", "params": { "id": "nope" } })),
        )
        .await;
        assert_eq!(res.error.unwrap().code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn finalize_with_gap_reports_incomplete_transfer() {
        let app = test_state();
        let chunk = spinpost_protocol::UploadChunk::new("t1", 0, 2, "image/png", b"ab");
        let res = dispatch(
            &app,
            ReqFrame {
                id: "3".into(),
                command: Command::UploadChunk(chunk),
            },
        )
        .await;
        assert!(res.ok);

        let res = dispatch(
            &app,
            frame(json!({ "id": "4", "method": "finalizeUpload", "params": { "transfer_id": "t1" } })),
        )
        .await;
        assert_eq!(res.error.unwrap().code, "INCOMPLETE_TRANSFER");
        assert!(!app.archive.exists("t1").unwrap());
    }

    #[tokio::test]
    async fn schedule_add_list_delete() {
        let app = test_state();
        let res = dispatch(
            &app,
            frame(json!({
                "id": "5",
                "method": "addSchedule",
                "params": {
                    "name": "mornings",
                    "frequency": "daily",
                    "time_of_day": "09:00:00",
                    "start_date": "2026-05-01",
                    "campaign": { "destinations": [{ "id": "g1" }], "template": "hi" }
                }
            })),
        )
        .await;
        assert!(res.ok, "{:?}", res.error);
        let id = res.payload.unwrap()["id"].as_str().unwrap().to_string();

        let res = dispatch(&app, frame(json!({ "id": "6", "method": "listSchedules" }))).await;
        assert_eq!(res.payload.unwrap()["schedules"].as_array().unwrap().len(), 1);

        let res = dispatch(
            &app,
            frame(json!({ "id": "7", "method": "deleteSchedule", "params": { "id": id } })),
        )
        .await;
        assert!(res.ok);
    }
}
