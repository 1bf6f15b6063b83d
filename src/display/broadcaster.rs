use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

/* -------------------------
   Event payloads
--------------------------*/

#[derive(Debug, Clone, Serialize)]
pub struct BoardEntry {
    pub queue_entry_id: Uuid,
    pub number: i32,
    pub display_name: String,
    pub status: &'static str,
}

/// Full ordered state of one queue bucket. A client can resync from a
/// single one of these.
#[derive(Debug, Clone, Serialize)]
pub struct QueueBoardState {
    pub day: NaiveDate,
    pub specialist_employee_id: Uuid,
    pub queue_tag: String,
    pub entries: Vec<BoardEntry>,
    pub waiting: usize,
    pub called: usize,
    pub served: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientCall {
    pub queue_entry_id: Uuid,
    pub number: i32,
    pub display_name: String,
    pub queue_tag: String,
    pub specialist_employee_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct Announcement {
    pub text: String,
}

/// Last known state of one board, replayed to every connection that joins.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardSnapshot {
    pub queue: Option<QueueBoardState>,
    pub last_call: Option<PatientCall>,
    pub announcement: Option<Announcement>,
}

struct DisplayConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Board {
    connections: Vec<DisplayConnection>,
    snapshot: BoardSnapshot,
}

/* -------------------------
   Hub
--------------------------*/

/// Process-wide registry of display boards. The board owns its connection
/// set; handlers only ever hold the receiving half of their own channel.
/// Sends are unbounded and never block the domain operation that fired the
/// event; a closed channel just drops that one connection.
#[derive(Clone, Default)]
pub struct DisplayHub {
    boards: Arc<DashMap<String, Board>>,
}

impl DisplayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `board_id`. The first message queued
    /// into the returned receiver is always `initial_state` with the last
    /// snapshot, so a reconnecting display is never blank.
    pub fn subscribe(&self, board_id: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut board = self.boards.entry(board_id.to_string()).or_default();

        let initial = frame("initial_state", json!(board.snapshot), None, false, None);
        // Receiver is still in scope, the send cannot fail here.
        let _ = tx.send(initial);

        let id = Uuid::new_v4();
        board.connections.push(DisplayConnection { id, tx });
        tracing::debug!(board_id, connection_id = %id, "display connected");
        rx
    }

    pub fn connection_count(&self, board_id: &str) -> usize {
        self.boards
            .get(board_id)
            .map(|b| b.connections.len())
            .unwrap_or(0)
    }

    /// New full queue state: replaces the stored snapshot and fans out.
    pub fn publish_queue_update(&self, board_id: &str, state: QueueBoardState) {
        let mut board = self.boards.entry(board_id.to_string()).or_default();
        let msg = frame("queue_update", json!(state), None, false, None);
        board.snapshot.queue = Some(state);
        fan_out(board_id, &mut board, msg);
    }

    pub fn publish_patient_call(
        &self,
        board_id: &str,
        call: PatientCall,
        display_duration: i64,
        voice_text: Option<String>,
    ) {
        let mut board = self.boards.entry(board_id.to_string()).or_default();
        let msg = frame(
            "patient_call",
            json!(call),
            Some(display_duration),
            true,
            voice_text,
        );
        board.snapshot.last_call = Some(call);
        fan_out(board_id, &mut board, msg);
    }

    pub fn publish_announcement(
        &self,
        board_id: &str,
        announcement: Announcement,
        display_duration: i64,
        sound_enabled: bool,
        voice_text: Option<String>,
    ) {
        let mut board = self.boards.entry(board_id.to_string()).or_default();
        let msg = frame(
            "announcement",
            json!(announcement),
            Some(display_duration),
            sound_enabled,
            voice_text,
        );
        board.snapshot.announcement = Some(announcement);
        fan_out(board_id, &mut board, msg);
    }
}

fn frame(
    kind: &str,
    data: serde_json::Value,
    display_duration: Option<i64>,
    sound_enabled: bool,
    voice_text: Option<String>,
) -> Message {
    let mut body = json!({
        "type": kind,
        "data": data,
        "sound_enabled": sound_enabled,
    });
    if let Some(d) = display_duration {
        body["display_duration"] = json!(d);
    }
    if let Some(v) = voice_text {
        body["voice_text"] = json!(v);
    }
    Message::Text(body.to_string().into())
}

/// Attempt every live connection independently; prune the ones whose
/// receiving task is gone. Failures never reach the domain caller.
fn fan_out(board_id: &str, board: &mut Board, msg: Message) {
    let before = board.connections.len();
    board
        .connections
        .retain(|conn| conn.tx.send(msg.clone()).is_ok());
    let pruned = before - board.connections.len();
    if pruned > 0 {
        tracing::info!(board_id, pruned, "pruned dead display connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(number: i32) -> PatientCall {
        PatientCall {
            queue_entry_id: Uuid::new_v4(),
            number,
            display_name: format!("Patient {number}"),
            queue_tag: "cardiology_common".into(),
            specialist_employee_id: Uuid::new_v4(),
        }
    }

    fn queue_state(numbers: &[i32]) -> QueueBoardState {
        QueueBoardState {
            day: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            specialist_employee_id: Uuid::new_v4(),
            queue_tag: "cardiology_common".into(),
            entries: numbers
                .iter()
                .map(|n| BoardEntry {
                    queue_entry_id: Uuid::new_v4(),
                    number: *n,
                    display_name: format!("Patient {n}"),
                    status: "waiting",
                })
                .collect(),
            waiting: numbers.len(),
            called: 0,
            served: 0,
        }
    }

    async fn next_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> serde_json::Value {
        let msg = rx.recv().await.expect("message");
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        serde_json::from_str(&text).expect("valid json")
    }

    #[tokio::test]
    async fn first_frame_is_initial_state_even_for_fresh_board() {
        let hub = DisplayHub::new();
        let mut rx = hub.subscribe("cardiology_common");
        let v = next_json(&mut rx).await;
        assert_eq!(v["type"], "initial_state");
        assert!(v["data"]["queue"].is_null());
        assert!(v["data"]["last_call"].is_null());
    }

    #[tokio::test]
    async fn late_joiner_sees_everything_published_before_it() {
        let hub = DisplayHub::new();
        hub.publish_queue_update("cardiology_common", queue_state(&[1, 2, 3]));
        hub.publish_patient_call("cardiology_common", call(2), 20, Some("Number 2".into()));

        let mut rx = hub.subscribe("cardiology_common");
        let v = next_json(&mut rx).await;
        assert_eq!(v["type"], "initial_state");
        assert_eq!(v["data"]["queue"]["entries"].as_array().unwrap().len(), 3);
        assert_eq!(v["data"]["last_call"]["number"], 2);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_live_connection() {
        let hub = DisplayHub::new();
        let mut a = hub.subscribe("ent_common");
        let mut b = hub.subscribe("ent_common");
        // drain initial_state
        next_json(&mut a).await;
        next_json(&mut b).await;

        hub.publish_patient_call("ent_common", call(7), 15, None);

        let va = next_json(&mut a).await;
        let vb = next_json(&mut b).await;
        assert_eq!(va["type"], "patient_call");
        assert_eq!(va["data"]["number"], 7);
        assert_eq!(vb["data"]["number"], 7);
        assert_eq!(va["display_duration"], 15);
        assert_eq!(va["sound_enabled"], true);
    }

    #[tokio::test]
    async fn dead_connection_is_pruned_without_disturbing_others() {
        let hub = DisplayHub::new();
        let dead = hub.subscribe("lab_common");
        let mut live = hub.subscribe("lab_common");
        next_json(&mut live).await;
        assert_eq!(hub.connection_count("lab_common"), 2);

        drop(dead);
        hub.publish_announcement(
            "lab_common",
            Announcement { text: "Lab opens at nine".into() },
            30,
            false,
            None,
        );

        let v = next_json(&mut live).await;
        assert_eq!(v["type"], "announcement");
        assert_eq!(hub.connection_count("lab_common"), 1);
    }

    #[tokio::test]
    async fn boards_are_isolated_from_each_other() {
        let hub = DisplayHub::new();
        let mut cardio = hub.subscribe("cardiology_common");
        let mut ent = hub.subscribe("ent_common");
        next_json(&mut cardio).await;
        next_json(&mut ent).await;

        hub.publish_queue_update("cardiology_common", queue_state(&[1]));

        let v = next_json(&mut cardio).await;
        assert_eq!(v["type"], "queue_update");
        assert!(ent.try_recv().is_err());
    }
}
