pub mod datetime;

use std::collections::BTreeMap;

use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};

pub type TaskId = u64;

/// Analytics counters keyed by name
/// (`tasks_created`, ...).
pub type Counters =
  BTreeMap<String, i64>;

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct Task {
  pub id:          TaskId,
  pub title:       String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub completed:   bool,
  #[serde(
    default,
    with = "datetime::wire_date::option"
  )]
  pub expiry_date: Option<DateTime<Utc>>,
  #[serde(with = "datetime::wire_date")]
  pub created_at:  DateTime<Utc>
}

impl Task {
  /// Derived at read time; never
  /// stored on the entity.
  pub fn is_expired(
    &self,
    now: DateTime<Utc>
  ) -> bool {
    self
      .expiry_date
      .map(|expiry| expiry < now)
      .unwrap_or(false)
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct CreateTaskInput {
  pub title:       String,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description: Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub completed:   Option<bool>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "datetime::wire_date::option"
  )]
  pub expiry_date: Option<DateTime<Utc>>
}

impl CreateTaskInput {
  pub fn titled(
    title: impl Into<String>
  ) -> Self {
    Self {
      title:       title.into(),
      description: None,
      completed:   None,
      expiry_date: None
    }
  }
}

/// Partial update; absent fields are
/// left untouched by the backend.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
pub struct UpdateTaskInput {
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub title:       Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub description: Option<String>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub completed:   Option<bool>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none",
    with = "datetime::wire_date::option"
  )]
  pub expiry_date: Option<DateTime<Utc>>
}

impl UpdateTaskInput {
  pub fn completed(
    completed: bool
  ) -> Self {
    Self {
      completed: Some(completed),
      ..Self::default()
    }
  }

  pub fn title(
    title: impl Into<String>
  ) -> Self {
    Self {
      title: Some(title.into()),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.title.is_none()
      && self.description.is_none()
      && self.completed.is_none()
      && self.expiry_date.is_none()
  }
}

/// One page of tasks as returned by
/// `GET /tasks?page=N`. The backend
/// answers either with an envelope or
/// with a bare array; both decode here.
#[derive(
  Debug,
  Clone,
  Deserialize,
  PartialEq,
  Eq,
  Default,
)]
#[serde(from = "PageBody")]
pub struct TaskPage {
  pub tasks:       Vec<Task>,
  pub total_pages: Option<u32>,
  pub total_count: Option<u64>
}

impl TaskPage {
  pub fn bare(tasks: Vec<Task>) -> Self {
    Self {
      tasks,
      total_pages: None,
      total_count: None
    }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageBody {
  Envelope {
    tasks:       Vec<Task>,
    #[serde(default)]
    total_pages: Option<u32>,
    #[serde(default)]
    total_count: Option<u64>
  },
  Bare(Vec<Task>)
}

impl From<PageBody> for TaskPage {
  fn from(body: PageBody) -> Self {
    match body {
      | PageBody::Envelope {
        tasks,
        total_pages,
        total_count
      } => {
        Self {
          tasks,
          total_pages,
          total_count
        }
      }
      | PageBody::Bare(tasks) => {
        Self::bare(tasks)
      }
    }
  }
}

/// A frame on the push channel,
/// discriminated by its `event` field.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(
  tag = "event",
  rename_all = "snake_case"
)]
pub enum PushMessage {
  Created {
    task: Task
  },
  Updated {
    task: Task
  },
  Deleted {
    id: TaskId
  },
  CounterUpdated {
    counter: String,
    value:   i64
  },
  #[serde(other)]
  Unknown
}

impl PushMessage {
  pub fn kind(&self) -> &'static str {
    match self {
      | Self::Created { .. } => "created",
      | Self::Updated { .. } => "updated",
      | Self::Deleted { .. } => "deleted",
      | Self::CounterUpdated {
        ..
      } => "counter_updated",
      | Self::Unknown => "unknown"
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    TimeZone,
    Utc
  };

  use super::*;

  fn sample_json() -> &'static str {
    r#"{"id":4,"title":"Ship it","description":null,"completed":false,"expiry_date":"2026-03-01T10:00:00","created_at":"2026-02-01T08:30:00.123456"}"#
  }

  #[test]
  fn decodes_backend_task() {
    let task: Task =
      serde_json::from_str(sample_json())
        .expect("decode task");
    assert_eq!(task.id, 4);
    assert_eq!(task.description, None);
    assert_eq!(
      task.expiry_date,
      Utc
        .with_ymd_and_hms(
          2026, 3, 1, 10, 0, 0
        )
        .single()
    );
  }

  #[test]
  fn expired_is_derived_from_wall_clock()
  {
    let task: Task =
      serde_json::from_str(sample_json())
        .expect("decode task");
    let before = Utc
      .with_ymd_and_hms(
        2026, 2, 28, 0, 0, 0
      )
      .single()
      .expect("valid date");
    let after = Utc
      .with_ymd_and_hms(
        2026, 3, 2, 0, 0, 0
      )
      .single()
      .expect("valid date");
    assert!(!task.is_expired(before));
    assert!(task.is_expired(after));

    let mut open = task.clone();
    open.expiry_date = None;
    assert!(!open.is_expired(after));
  }

  #[test]
  fn page_accepts_envelope_and_bare_array()
  {
    let envelope = format!(
      r#"{{"tasks":[{}],"total_pages":3}}"#,
      sample_json()
    );
    let page: TaskPage =
      serde_json::from_str(&envelope)
        .expect("envelope");
    assert_eq!(page.tasks.len(), 1);
    assert_eq!(page.total_pages, Some(3));
    assert_eq!(page.total_count, None);

    let bare =
      format!("[{}]", sample_json());
    let page: TaskPage =
      serde_json::from_str(&bare)
        .expect("bare");
    assert_eq!(page.tasks.len(), 1);
    assert_eq!(page.total_pages, None);
  }

  #[test]
  fn push_messages_decode_by_event() {
    let deleted: PushMessage =
      serde_json::from_str(
        r#"{"event":"deleted","id":99}"#
      )
      .expect("deleted");
    assert_eq!(
      deleted,
      PushMessage::Deleted { id: 99 }
    );

    let counter: PushMessage =
      serde_json::from_str(
        r#"{"event":"counter_updated","counter":"tasks_created","value":12}"#
      )
      .expect("counter");
    assert_eq!(counter.kind(), "counter_updated");

    let created: PushMessage =
      serde_json::from_str(&format!(
        r#"{{"event":"created","task":{}}}"#,
        sample_json()
      ))
      .expect("created");
    assert!(matches!(
      created,
      PushMessage::Created { ref task } if task.id == 4
    ));
  }

  #[test]
  fn unrecognized_event_is_unknown() {
    let msg: PushMessage =
      serde_json::from_str(
        r#"{"event":"archived","id":1}"#
      )
      .expect("unknown event");
    assert_eq!(msg, PushMessage::Unknown);
  }

  #[test]
  fn known_event_with_missing_fields_is_rejected()
  {
    assert!(
      serde_json::from_str::<PushMessage>(
        r#"{"event":"updated"}"#
      )
      .is_err()
    );
    assert!(
      serde_json::from_str::<PushMessage>(
        r#"{"id":3}"#
      )
      .is_err()
    );
  }

  #[test]
  fn toggle_update_sends_only_changed_field()
  {
    let body = serde_json::to_string(
      &UpdateTaskInput::completed(true)
    )
    .expect("encode");
    assert_eq!(body, r#"{"completed":true}"#);
    assert!(UpdateTaskInput::default().is_empty());
  }

  #[test]
  fn create_input_omits_absent_fields() {
    let body = serde_json::to_string(
      &CreateTaskInput::titled("Buy milk")
    )
    .expect("encode");
    assert_eq!(body, r#"{"title":"Buy milk"}"#);
  }
}
