//! Task orchestration
//!
//! A filling request becomes a background task that walks the requested
//! templates one at a time. Each file is filled placeholder by placeholder
//! (retrieve, generate, substitute) and saved as an artifact. A failing file
//! is recorded and skipped; only failures outside the per-file loop fail the
//! task. Progress is persisted to the task store and narrated on the event bus.

use crate::generator::{ContentGenerator, Guidance};
use crate::placeholder::resolvable_placeholders;
use crate::substitution::substitute;
use crate::templates::{validate_name, TemplateRepository};
use docfill_common::document::DocumentCodec;
use docfill_common::errors::{AppError, Result};
use docfill_common::events::{EventBus, LogType, TaskEvent};
use docfill_common::generation::ImageInput;
use docfill_common::metrics;
use docfill_common::models::{FileResult, FileStatus, Task, TaskStatus};
use docfill_common::sources::SourceCatalog;
use docfill_common::store::TaskStore;
use docfill_search::FusionEngine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, info_span, instrument, warn, Instrument};

const SERVICE: &str = "template_filler";

/// A request to fill the templates of one folder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillRequest {
    pub folder: String,
    pub user_prompt: Option<String>,
    /// Base64 image, optionally as a `data:` URL
    pub process_flow: Option<String>,
    pub selected_files: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Route prefix for artifact download references
    pub download_prefix: String,
    /// Cap on fused chunks handed to generation
    pub top_k: Option<usize>,
}

/// Collaborators the orchestrator drives
pub struct OrchestratorDeps {
    pub store: Arc<dyn TaskStore>,
    pub bus: Arc<dyn EventBus>,
    pub templates: Arc<dyn TemplateRepository>,
    pub codec: Arc<dyn DocumentCodec>,
    pub engine: Arc<FusionEngine>,
    pub catalog: Arc<dyn SourceCatalog>,
    pub content: ContentGenerator,
}

/// The subset of `available` to process: the selection if any of it exists,
/// otherwise everything. Keeps `available` order.
pub fn resolve_targets(available: &[String], selected: Option<&[String]>) -> Vec<String> {
    let chosen: Vec<String> = match selected {
        Some(selected) if !selected.is_empty() => available
            .iter()
            .filter(|name| selected.contains(name))
            .cloned()
            .collect(),
        _ => Vec::new(),
    };

    if chosen.is_empty() {
        available.to_vec()
    } else {
        chosen
    }
}

fn fatal(stage: &str, e: AppError) -> AppError {
    match e {
        AppError::TaskFatal { .. } => e,
        other => AppError::TaskFatal {
            message: format!("{}: {}", stage, other),
        },
    }
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    store: Arc<dyn TaskStore>,
    bus: Arc<dyn EventBus>,
    templates: Arc<dyn TemplateRepository>,
    codec: Arc<dyn DocumentCodec>,
    engine: Arc<FusionEngine>,
    catalog: Arc<dyn SourceCatalog>,
    content: ContentGenerator,
    settings: Arc<OrchestratorSettings>,
}

impl TaskOrchestrator {
    pub fn new(deps: OrchestratorDeps, settings: OrchestratorSettings) -> Self {
        Self {
            store: deps.store,
            bus: deps.bus,
            templates: deps.templates,
            codec: deps.codec,
            engine: deps.engine,
            catalog: deps.catalog,
            content: deps.content,
            settings: Arc::new(settings),
        }
    }

    pub fn templates(&self) -> &Arc<dyn TemplateRepository> {
        &self.templates
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Validate a request and start it in the background. Returns the task id.
    pub async fn create_task(&self, request: FillRequest) -> Result<String> {
        let task = self.prepare(&request).await?;
        let task_id = task.id.clone();

        let span = info_span!("fill_task", task_id = %task_id, folder = %request.folder);
        let this = self.clone();
        tokio::spawn(async move { this.run(task, request).await }.instrument(span));

        Ok(task_id)
    }

    /// Check the folder and register a fresh task
    pub async fn prepare(&self, request: &FillRequest) -> Result<Task> {
        validate_name("folder", &request.folder)?;
        if !self.templates.folder_exists(&request.folder).await? {
            return Err(AppError::not_found("Folder", &request.folder));
        }

        let task = Task::new();
        self.store.create(&task).await?;
        metrics::record_task_started();

        info!(task_id = %task.id, folder = %request.folder, "Task created");
        Ok(task)
    }

    /// Best-known snapshot of a task
    pub async fn progress(&self, task_id: &str) -> Result<Task> {
        self.store
            .load(task_id)
            .await?
            .ok_or_else(|| AppError::not_found("Task", task_id))
    }

    /// Drive a prepared task to a terminal state. Emits exactly one
    /// `final_response`.
    pub async fn run(&self, mut task: Task, request: FillRequest) -> Task {
        let outcome = self.process(&mut task, &request).await;

        let (status, message) = match outcome {
            Ok(()) => (
                TaskStatus::Completed,
                format!(
                    "Generated {} of {} file(s)",
                    task.files_done, task.files_total
                ),
            ),
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Task failed");
                self.narrate(&task.id, format!("Task failed: {}", e), LogType::Error)
                    .await;
                (TaskStatus::Error, format!("Task failed: {}", e))
            }
        };

        task.finish(status);
        self.persist(&task).await;
        metrics::record_task_finished(task.status.as_str());

        self.bus
            .publish(
                &task.id,
                TaskEvent::FinalResponse {
                    status: task.status,
                    message,
                    files_done: task.files_done,
                    files_total: task.files_total,
                },
            )
            .await;

        info!(
            task_id = %task.id,
            status = task.status.as_str(),
            files_done = task.files_done,
            files_total = task.files_total,
            "Task finished"
        );
        task
    }

    async fn process(&self, task: &mut Task, request: &FillRequest) -> Result<()> {
        self.narrate(
            &task.id,
            format!("Started filling templates in '{}'", request.folder),
            LogType::Info,
        )
        .await;

        let mut guidance = Guidance {
            user_prompt: request
                .user_prompt
                .clone()
                .filter(|p| !p.trim().is_empty()),
            flow_summary: None,
        };

        if let Some(payload) = request.process_flow.as_deref().filter(|p| !p.trim().is_empty()) {
            self.narrate(&task.id, "Summarizing process flow diagram", LogType::Info)
                .await;
            let image = ImageInput::from_base64_payload(payload).map_err(|e| fatal("process flow", e))?;
            let summary = self
                .content
                .summarize_flow(&image)
                .await
                .map_err(|e| fatal("process flow", e))?;
            self.narrate(&task.id, "Process flow summarized", LogType::Success)
                .await;
            guidance.flow_summary = Some(summary);
        }

        let available = self
            .templates
            .list_templates(&request.folder)
            .await
            .map_err(|e| fatal("listing templates", e))?;
        let targets = resolve_targets(&available, request.selected_files.as_deref());

        task.files_total = targets.len();
        self.persist(task).await;
        self.narrate(
            &task.id,
            format!("Found {} template(s) to fill", targets.len()),
            LogType::Info,
        )
        .await;

        for file in &targets {
            self.narrate(&task.id, format!("Processing {}", file), LogType::Info)
                .await;

            let (result, event) = match self.fill_file(&request.folder, file, &guidance).await {
                Ok(artifact) => {
                    let reference = format!(
                        "{}/{}",
                        self.settings.download_prefix.trim_end_matches('/'),
                        artifact
                    );
                    self.narrate(&task.id, format!("Generated {}", artifact), LogType::Success)
                        .await;
                    (
                        FileResult::done(&artifact, &reference),
                        (artifact, FileStatus::Done, Some(reference)),
                    )
                }
                Err(e) => {
                    error!(task_id = %task.id, file = %file, error = %e, "File failed");
                    self.narrate(
                        &task.id,
                        format!("Failed to process {}: {}", file, e),
                        LogType::Error,
                    )
                    .await;
                    (FileResult::failed(file), (file.clone(), FileStatus::Error, None))
                }
            };

            metrics::record_file(result.status.as_str());
            task.record(result);
            self.persist(task).await;

            let (file_name, status, download_url) = event;
            self.bus
                .publish(
                    &task.id,
                    TaskEvent::FileUpdate {
                        file_name,
                        status,
                        download_url,
                        files_done: task.files_done,
                        files_total: task.files_total,
                    },
                )
                .await;
        }

        Ok(())
    }

    /// Fill one template and save it. Returns the artifact name.
    #[instrument(skip(self, guidance))]
    async fn fill_file(&self, folder: &str, file: &str, guidance: &Guidance) -> Result<String> {
        let bytes = self.templates.load(folder, file).await?;
        let mut doc = self.codec.decode(&bytes)?;

        let collections: Vec<String> = self
            .catalog
            .list()
            .await?
            .iter()
            .map(|record| record.collection_id().to_string())
            .collect();

        // Snapshot before any insertion so new paragraphs are never revisited
        let placeholders = resolvable_placeholders(&doc)?;
        info!(placeholders = placeholders.len(), collections = collections.len(), "Filling template");

        for placeholder in &placeholders {
            let chunks = self
                .engine
                .search(&placeholder.token, &collections, self.settings.top_k)
                .await;
            let text = self
                .content
                .generate(&placeholder.token, placeholder.context, &chunks, guidance)
                .await?;
            substitute(&mut doc, placeholder.paragraph, &text)?;
        }

        let artifact = format!("filled_{}", file);
        let encoded = self.codec.encode(&doc)?;
        self.templates.save_artifact(&artifact, encoded).await?;
        Ok(artifact)
    }

    async fn narrate(&self, task_id: &str, message: impl Into<String>, log_type: LogType) {
        self.bus
            .publish(task_id, TaskEvent::log(SERVICE, message, log_type))
            .await;
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.store.save(task).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist task snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::InMemoryTemplateRepository;
    use async_trait::async_trait;
    use docfill_common::config::RetrievalConfig;
    use docfill_common::document::{Document, DocumentStructure, JsonDocumentCodec};
    use docfill_common::embeddings::{Embedder, HashEmbedder};
    use docfill_common::events::{subscribe_channel, InMemoryEventBus};
    use docfill_common::generation::Generator;
    use docfill_common::sources::{InMemorySourceCatalog, SourceRecord};
    use docfill_common::store::InMemoryTaskStore;
    use docfill_search::{ChunkKind, ChunkRecord, CollectionBackend, MemoryBackend};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Replies "<token> one.\n\n<token> two." and fails on the token "boom".
    /// Every text prompt is recorded.
    #[derive(Default)]
    struct Scripted {
        prompts: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, prompt: &str, image: Option<&ImageInput>) -> Result<String> {
            if image.is_some() {
                return Ok("Intake, then review.".into());
            }
            self.prompts.lock().unwrap().push(prompt.to_string());
            let token = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Placeholder: "))
                .unwrap_or_default();
            if token == "boom" {
                return Err(AppError::GenerationFailure {
                    message: "upstream 500".into(),
                });
            }
            Ok(format!("{} one.\n\n{} two.", token, token))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct Harness {
        orchestrator: TaskOrchestrator,
        templates: Arc<InMemoryTemplateRepository>,
        bus: Arc<InMemoryEventBus>,
        prompts: Arc<std::sync::Mutex<Vec<String>>>,
    }

    fn template(section: &str, cell: &str) -> Vec<u8> {
        let mut doc = Document::new();
        let root = doc.root();
        doc.push_paragraph(root, section, None).unwrap();
        let table = doc.push_table(root, 1, 1).unwrap();
        let cell_id = doc.cell(table, 0, 0).unwrap();
        doc.push_paragraph(cell_id, cell, None).unwrap();
        JsonDocumentCodec.encode(&doc).unwrap()
    }

    async fn harness() -> Harness {
        let templates = Arc::new(InMemoryTemplateRepository::new());
        templates.add_template("pkg", "a.json", template("<summary>", "<owner>")).await;
        templates.add_template("pkg", "b.json", template("<scope>", "none")).await;

        let backend = Arc::new(MemoryBackend::new());
        let embedder = Arc::new(HashEmbedder::new(32));
        let catalog = Arc::new(InMemorySourceCatalog::new());
        let record = SourceRecord::new("manual.pdf");
        backend
            .open(record.collection_id())
            .await
            .unwrap()
            .upsert(vec![ChunkRecord {
                id: "c1".into(),
                source_id: record.id.clone(),
                text: "summary of valve maintenance".into(),
                kind: ChunkKind::Text,
                page: "1".into(),
                embedding: embedder.embed("summary of valve maintenance").await.unwrap(),
            }])
            .await
            .unwrap();
        catalog.add(record).await.unwrap();

        let bus = Arc::new(InMemoryEventBus::new());
        let scripted = Scripted::default();
        let prompts = scripted.prompts.clone();
        let orchestrator = TaskOrchestrator::new(
            OrchestratorDeps {
                store: Arc::new(InMemoryTaskStore::new()),
                bus: bus.clone(),
                templates: templates.clone(),
                codec: Arc::new(JsonDocumentCodec),
                engine: Arc::new(FusionEngine::new(backend, embedder, &RetrievalConfig::default())),
                catalog,
                content: ContentGenerator::new(Arc::new(scripted)),
            },
            OrchestratorSettings {
                download_prefix: "/api/template/download".into(),
                top_k: Some(5),
            },
        );

        Harness {
            orchestrator,
            templates,
            bus,
            prompts,
        }
    }

    fn request(folder: &str) -> FillRequest {
        FillRequest {
            folder: folder.into(),
            ..Default::default()
        }
    }

    fn drain(rx: &mut UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn file_updates(events: &[TaskEvent]) -> Vec<(String, FileStatus, Option<String>, usize, usize)> {
        events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::FileUpdate {
                    file_name,
                    status,
                    download_url,
                    files_done,
                    files_total,
                } => Some((
                    file_name.clone(),
                    *status,
                    download_url.clone(),
                    *files_done,
                    *files_total,
                )),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_resolve_targets() {
        let available = vec!["a.json".to_string(), "b.json".to_string(), "c.json".to_string()];

        let selection = vec!["c.json".to_string(), "a.json".to_string()];
        let picked = resolve_targets(&available, Some(selection.as_slice()));
        assert_eq!(picked, vec!["a.json", "c.json"]);

        let missing = resolve_targets(&available, Some(&["zzz.json".to_string()][..]));
        assert_eq!(missing, available);

        assert_eq!(resolve_targets(&available, Some(&[][..])), available);
        assert_eq!(resolve_targets(&available, None), available);
    }

    #[tokio::test]
    async fn test_fills_every_template() {
        let h = harness().await;
        let task = h.orchestrator.prepare(&request("pkg")).await.unwrap();
        let (_, mut rx) = subscribe_channel(h.bus.as_ref(), &task.id).await;

        let task = h.orchestrator.run(task, request("pkg")).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!((task.files_done, task.files_total), (2, 2));
        assert_eq!(
            task.results[0].download_reference.as_deref(),
            Some("/api/template/download/filled_a.json")
        );

        let artifact = h.templates.read_artifact("filled_a.json").await.unwrap();
        let doc = JsonDocumentCodec.decode(&artifact).unwrap();
        let body: Vec<_> = doc
            .paragraphs(doc.root())
            .unwrap()
            .into_iter()
            .map(|p| doc.text(p).unwrap())
            .collect();
        assert_eq!(body, vec!["summary one.", "summary two."]);

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(TaskEvent::CallLog { .. })));
        assert!(events.last().map(TaskEvent::is_final).unwrap_or(false));
        assert_eq!(events.iter().filter(|e| e.is_final()).count(), 1);
        assert_eq!(
            file_updates(&events)
                .into_iter()
                .map(|u| (u.0, u.3))
                .collect::<Vec<_>>(),
            vec![("filled_a.json".to_string(), 1), ("filled_b.json".to_string(), 2)]
        );

        let stored = h.orchestrator.progress(&task.id).await.unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn test_failing_file_is_isolated() {
        let h = harness().await;
        h.templates.add_template("pkg", "0_broken.json", b"not json".to_vec()).await;
        h.templates.add_template("pkg", "1_boom.json", template("<boom>", "x")).await;

        let task = h.orchestrator.prepare(&request("pkg")).await.unwrap();
        let (_, mut rx) = subscribe_channel(h.bus.as_ref(), &task.id).await;
        let task = h.orchestrator.run(task, request("pkg")).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!((task.files_done, task.files_total), (2, 4));
        assert_eq!(task.results[0], FileResult::failed("0_broken.json"));
        assert_eq!(task.results[1], FileResult::failed("1_boom.json"));
        assert_eq!(task.results[2].status, FileStatus::Done);
        assert_eq!(task.results[3].status, FileStatus::Done);

        let updates = file_updates(&drain(&mut rx));
        assert_eq!(updates[0].1, FileStatus::Error);
        assert_eq!(updates[0].2, None);
        for update in &updates {
            assert!(update.3 <= update.4);
        }
        assert_eq!(
            h.templates.artifact_names().await,
            vec!["filled_a.json", "filled_b.json"]
        );
    }

    #[tokio::test]
    async fn test_selected_files_subset() {
        let h = harness().await;
        let req = FillRequest {
            folder: "pkg".into(),
            selected_files: Some(vec!["b.json".into(), "missing.json".into()]),
            ..Default::default()
        };

        let task = h.orchestrator.prepare(&req).await.unwrap();
        let task = h.orchestrator.run(task, req).await;

        assert_eq!(task.files_total, 1);
        assert_eq!(task.results[0].filename, "filled_b.json");
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_see_same_updates() {
        let h = harness().await;
        let task = h.orchestrator.prepare(&request("pkg")).await.unwrap();
        let (_, mut first) = subscribe_channel(h.bus.as_ref(), &task.id).await;
        let (_, mut second) = subscribe_channel(h.bus.as_ref(), &task.id).await;

        h.orchestrator.run(task, request("pkg")).await;

        let first = drain(&mut first);
        let second = drain(&mut second);
        assert_eq!(file_updates(&first), file_updates(&second));
        assert_eq!(first.len(), second.len());
        assert!(first.last().map(TaskEvent::is_final).unwrap_or(false));
    }

    #[tokio::test]
    async fn test_bad_flow_image_fails_task() {
        let h = harness().await;
        let req = FillRequest {
            folder: "pkg".into(),
            process_flow: Some("data:image/png;base64,@@@".into()),
            ..Default::default()
        };

        let task = h.orchestrator.prepare(&req).await.unwrap();
        let (_, mut rx) = subscribe_channel(h.bus.as_ref(), &task.id).await;
        let task = h.orchestrator.run(task, req).await;

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.files_total, 0);
        assert!(h.templates.artifact_names().await.is_empty());

        let events = drain(&mut rx);
        match events.last() {
            Some(TaskEvent::FinalResponse { status, .. }) => assert_eq!(*status, TaskStatus::Error),
            other => panic!("expected final response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flow_summary_reaches_prompts() {
        let h = harness().await;
        let req = FillRequest {
            folder: "pkg".into(),
            process_flow: Some("aGVsbG8=".into()),
            user_prompt: Some("Plant B".into()),
            ..Default::default()
        };

        let task = h.orchestrator.prepare(&req).await.unwrap();
        let task = h.orchestrator.run(task, req).await;
        assert_eq!(task.status, TaskStatus::Completed);

        let prompts = h.prompts.lock().unwrap().clone();
        // <summary>, <owner> and <scope>
        assert_eq!(prompts.len(), 3);
        for prompt in &prompts {
            assert!(prompt.contains("Process flow summary: Intake, then review."));
            assert!(prompt.contains("User guidance: Plant B"));
        }
    }

    #[tokio::test]
    async fn test_prompts_without_flow_leave_summary_blank() {
        let h = harness().await;
        let task = h.orchestrator.prepare(&request("pkg")).await.unwrap();
        h.orchestrator.run(task, request("pkg")).await;

        let prompts = h.prompts.lock().unwrap().clone();
        assert!(!prompts.is_empty());
        assert!(prompts
            .iter()
            .all(|p| p.contains("Process flow summary: \n") && !p.contains("Intake")));
    }

    #[tokio::test]
    async fn test_unknown_folder_rejected() {
        let h = harness().await;
        let err = h.orchestrator.create_task(request("nope")).await.unwrap_err();
        assert!(matches!(err, AppError::SourceNotFound { .. }));

        let err = h.orchestrator.create_task(request("../etc")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_unknown_task_progress() {
        let h = harness().await;
        let err = h.orchestrator.progress("missing").await.unwrap_err();
        assert!(matches!(err, AppError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_background_task_completes() {
        let h = harness().await;
        let task_id = h.orchestrator.create_task(request("pkg")).await.unwrap();

        let mut snapshot = h.orchestrator.progress(&task_id).await.unwrap();
        for _ in 0..100 {
            assert!(snapshot.files_done <= snapshot.files_total);
            if snapshot.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = h.orchestrator.progress(&task_id).await.unwrap();
        }

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.files_done, 2);
    }
}
