//! Task lifecycle plumbing: the ordered event queue an executor publishes to,
//! the `TaskUpdater` convenience handle, and the in-memory task store the
//! server folds events into.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::protocol::{
    Artifact, Message, Part, StreamResponse, Task, TaskArtifactUpdateEvent, TaskState,
    TaskStatus, TaskStatusUpdateEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Status(TaskStatusUpdateEvent),
    Artifact(TaskArtifactUpdateEvent),
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Status(e) => &e.task_id,
            TaskEvent::Artifact(e) => &e.task_id,
        }
    }

    pub fn into_response(self) -> StreamResponse {
        match self {
            TaskEvent::Status(e) => StreamResponse::StatusUpdate(e),
            TaskEvent::Artifact(e) => StreamResponse::ArtifactUpdate(e),
        }
    }
}

/// Sending half of a task's ordered event channel.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, event: TaskEvent) -> Result<(), AgentError> {
        self.tx
            .send(event)
            .map_err(|_| AgentError::Other("task event queue closed".to_string()))
    }
}

/// Publishes lifecycle updates for one task.
#[derive(Debug, Clone)]
pub struct TaskUpdater {
    queue: EventQueue,
    task_id: String,
    context_id: String,
}

impl TaskUpdater {
    pub fn new(queue: EventQueue, task_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            queue,
            task_id: task_id.into(),
            context_id: context_id.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn update_status(
        &self,
        state: TaskState,
        message: Option<Message>,
        is_final: bool,
    ) -> Result<(), AgentError> {
        self.queue.enqueue(TaskEvent::Status(TaskStatusUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus::now(state, message),
            is_final,
        }))
    }

    pub fn submit(&self) -> Result<(), AgentError> {
        self.update_status(TaskState::Submitted, None, false)
    }

    pub fn start_work(&self) -> Result<(), AgentError> {
        self.update_status(TaskState::Working, None, false)
    }

    pub fn complete(&self) -> Result<(), AgentError> {
        self.update_status(TaskState::Completed, None, true)
    }

    pub fn add_artifact(&self, parts: Vec<Part>, name: Option<String>) -> Result<(), AgentError> {
        self.queue.enqueue(TaskEvent::Artifact(TaskArtifactUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            artifact: Artifact {
                artifact_id: uuid::Uuid::new_v4().to_string(),
                name,
                parts,
            },
            append: None,
            last_chunk: None,
        }))
    }

    pub fn new_agent_message(&self, parts: Vec<Part>) -> Message {
        Message::agent(parts, &self.task_id, &self.context_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<String, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Record a follow-up user message on an existing task.
    pub fn append_history(&self, task_id: &str, message: Message) -> Result<(), AgentError> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))?;
        task.history.push(message);
        Ok(())
    }

    /// Fold one executor event into the stored task, creating the task on
    /// its first event with `inbound` as the opening history entry.
    pub fn apply(&self, event: &TaskEvent, inbound: &Message) -> Task {
        let (task_id, context_id) = match event {
            TaskEvent::Status(e) => (&e.task_id, &e.context_id),
            TaskEvent::Artifact(e) => (&e.task_id, &e.context_id),
        };
        let mut task = self.tasks.entry(task_id.clone()).or_insert_with(|| Task {
            id: task_id.clone(),
            context_id: context_id.clone(),
            status: TaskStatus::now(TaskState::Submitted, None),
            history: vec![inbound.clone()],
            artifacts: Vec::new(),
        });

        match event {
            TaskEvent::Status(e) => {
                if let Some(previous) = task.status.message.take() {
                    task.history.push(previous);
                }
                task.status = e.status.clone();
            }
            TaskEvent::Artifact(e) => {
                let existing = task
                    .artifacts
                    .iter()
                    .position(|a| a.artifact_id == e.artifact.artifact_id);
                match existing {
                    Some(i) if e.append == Some(true) => task.artifacts[i]
                        .parts
                        .extend(e.artifact.parts.iter().cloned()),
                    Some(i) => task.artifacts[i] = e.artifact.clone(),
                    None => task.artifacts.push(e.artifact.clone()),
                }
            }
        }

        task.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn updater_emits_lifecycle_in_order() {
        let (queue, mut rx) = EventQueue::new();
        let updater = TaskUpdater::new(queue, "t-1", "c-1");
        updater.submit().unwrap();
        updater.start_work().unwrap();
        updater.add_artifact(vec![Part::text("done")], None).unwrap();
        updater.complete().unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        let states: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Status(s) => Some((s.status.state, s.is_final)),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                (TaskState::Submitted, false),
                (TaskState::Working, false),
                (TaskState::Completed, true)
            ]
        );
        assert!(matches!(events[2], TaskEvent::Artifact(_)));
        assert!(events.iter().all(|e| e.task_id() == "t-1"));
    }

    #[test]
    fn enqueue_fails_once_receiver_is_gone() {
        let (queue, rx) = EventQueue::new();
        drop(rx);
        let updater = TaskUpdater::new(queue, "t", "c");
        assert!(updater.start_work().is_err());
    }

    #[test]
    fn store_builds_task_from_events() {
        let (queue, mut rx) = EventQueue::new();
        let updater = TaskUpdater::new(queue, "t-1", "c-1");
        let inbound = Message::user_text("show my repos");

        updater.submit().unwrap();
        updater.start_work().unwrap();
        let interim = updater.new_agent_message(vec![Part::text("Looking...")]);
        updater
            .update_status(TaskState::Working, Some(interim.clone()), false)
            .unwrap();
        updater.add_artifact(vec![Part::text("3 repos")], None).unwrap();
        updater.complete().unwrap();

        let store = InMemoryTaskStore::new();
        let mut last = None;
        for event in drain(&mut rx) {
            last = Some(store.apply(&event, &inbound));
        }
        let task = last.unwrap();
        assert_eq!(task.context_id, "c-1");
        assert_eq!(task.status.state, TaskState::Completed);
        assert_eq!(task.history, vec![inbound, interim]);
        assert_eq!(task.artifacts.len(), 1);
        assert_eq!(store.get("t-1"), Some(task));
    }

    #[test]
    fn append_history_requires_task() {
        let store = InMemoryTaskStore::new();
        let err = store
            .append_history("nope", Message::user_text("hi"))
            .unwrap_err();
        assert!(matches!(err, AgentError::TaskNotFound(_)));
    }
}
