use axum::extract::{Multipart, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Serialize;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use docscribe_core::pool::JobResult;
use docscribe_core::{
    Config, ExtractedText, GenerationJob, GenerationOptions, GenerationPool, LlmBackend,
    OpenAiBackend, ProgressEvent,
};
use docscribe_ingest::FileType;
use docscribe_ingest::archive::{ArchiveMember, extract_archive_bytes};

use crate::models::*;
use crate::state::AppState;
use crate::upload::{self, FormFields};

type EventSender = mpsc::Sender<Result<Event, Infallible>>;

pub async fn stream(State(state): State<Arc<AppState>>, multipart: Multipart) -> impl IntoResponse {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);

    tokio::spawn(async move {
        if let Err(e) = handle_stream(state, multipart, tx.clone()).await {
            tracing::warn!(error = %e, "generation stream ended with an error");
            let _ = tx
                .send(Ok(sse_event("error", &ErrorEvent { message: e })))
                .await;
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

async fn handle_stream(
    state: Arc<AppState>,
    multipart: Multipart,
    tx: EventSender,
) -> Result<(), String> {
    let fields = upload::parse_multipart(multipart, &state.config).await?;
    let backend = select_backend(&state, &fields)?;
    let config = build_config(&state, &fields);

    tracing::info!(
        file = %fields.file.filename,
        bytes = fields.file.data.len(),
        task = %fields.task,
        format = %fields.format,
        model = %config.model,
        "upload received"
    );

    // Create a temp directory (auto-cleaned on drop)
    let temp_dir =
        tempfile::tempdir().map_err(|e| format!("Failed to create temp directory: {}", e))?;

    match fields.file.file_type {
        FileType::Pdf | FileType::Text => {
            handle_single(&state, fields, config, backend, tx, temp_dir).await
        }
        FileType::Zip | FileType::TarGz => {
            handle_archive(fields, config, backend, tx, temp_dir).await
        }
    }
}

async fn handle_single(
    state: &AppState,
    fields: FormFields,
    config: Config,
    backend: Arc<dyn LlmBackend>,
    tx: EventSender,
    temp_dir: tempfile::TempDir,
) -> Result<(), String> {
    let filename = fields.file.filename.clone();

    let source = match fields.file.file_type {
        FileType::Pdf => {
            let pdf_path = temp_dir.path().join("upload.pdf");
            std::fs::write(&pdf_path, &fields.file.data)
                .map_err(|e| format!("Failed to write temp file: {}", e))?;
            extract_pdf_blocking(pdf_path, filename.clone()).await?
        }
        _ => docscribe_ingest::extract_text_bytes(&filename, &fields.file.data)
            .map_err(|e| e.to_string())?,
    };

    // Temp dir no longer needed after extraction
    drop(temp_dir);

    send(&tx, "extraction_complete", &extraction_event(&source)).await?;

    // Run generation in a separate task so we can detect client disconnect
    let options = GenerationOptions::new(fields.task, fields.instructions.clone());
    let client = state.client.clone();
    let cancel = CancellationToken::new();
    // Any early return, including a disconnect, stops the model call.
    let _cancel_on_exit = cancel.clone().drop_guard();
    let tx_progress = tx.clone();

    let generation_handle = tokio::spawn(async move {
        let progress = move |event: ProgressEvent| send_progress_event(&tx_progress, &event);
        docscribe_core::generate_document(
            &source,
            &options,
            &config,
            backend.as_ref(),
            &client,
            &progress,
            &cancel,
        )
        .await
    });

    // Race between generation completing and client disconnecting
    let outcome = tokio::select! {
        biased;
        _ = tx.closed() => return Err("Client disconnected".to_string()),
        result = generation_handle => {
            result
                .map_err(|e| format!("Generation task error: {}", e))?
                .map_err(|e| format!("{}: {}", filename, e))?
        }
    };

    let output = render_output(&outcome, fields.format)?;

    send(
        &tx,
        "complete",
        &CompleteEvent {
            filename: Some(outcome.filename),
            document: Some(outcome.document),
            parse_mode: Some(outcome.parse_mode),
            output: Some(output),
            file_count: None,
            files: None,
        },
    )
    .await
}

/// An archive member whose result is either already known (extraction
/// failed) or still pending in the pool.
enum Pending {
    Done(FileResultJson),
    Queued {
        filename: String,
        rx: oneshot::Receiver<JobResult>,
    },
}

async fn handle_archive(
    mut fields: FormFields,
    config: Config,
    backend: Arc<dyn LlmBackend>,
    tx: EventSender,
    temp_dir: tempfile::TempDir,
) -> Result<(), String> {
    let archive_name = fields.file.filename.clone();
    let data = std::mem::take(&mut fields.file.data);
    let dir = temp_dir.path().to_path_buf();
    let max_size = config.max_archive_bytes();

    let extraction = {
        let name = archive_name.clone();
        tokio::task::spawn_blocking(move || extract_archive_bytes(&name, &data, &dir, max_size))
            .await
            .map_err(|e| format!("Task join error: {}", e))?
            .map_err(|e| format!("{}: {}", archive_name, e))?
    };

    for message in extraction.warnings {
        send(&tx, "warning", &WarningEvent { message }).await?;
    }

    let members = extraction.members;
    let file_count = members.len();
    send(&tx, "archive_start", &ArchiveStartEvent { file_count }).await?;

    let format = fields.format;
    let options = GenerationOptions::new(fields.task, fields.instructions.clone());
    let cancel = CancellationToken::new();
    let tx_progress = tx.clone();
    let pool = GenerationPool::new(
        Arc::new(config),
        backend,
        Arc::new(move |event: ProgressEvent| send_progress_event(&tx_progress, &event)),
        cancel.clone(),
    );
    let _cancel_on_exit = cancel.clone().drop_guard();

    // Extract every member first and queue it; workers start generating
    // while later members are still being read.
    let mut pending = Vec::with_capacity(file_count);
    for (file_index, member) in members.into_iter().enumerate() {
        if tx.is_closed() {
            return Err("Client disconnected".to_string());
        }

        send(
            &tx,
            "file_start",
            &FileStartEvent {
                file_index,
                file_count,
                filename: member.filename.clone(),
            },
        )
        .await?;

        match extract_member(&member).await {
            Ok(source) => {
                send(&tx, "extraction_complete", &extraction_event(&source)).await?;
                let rx = pool
                    .submit(GenerationJob {
                        source,
                        options: options.clone(),
                    })
                    .await;
                pending.push(Pending::Queued {
                    filename: member.filename,
                    rx,
                });
            }
            Err(e) => {
                let result = FileResultJson::failed(member.filename, e);
                send(&tx, "file_complete", &result).await?;
                pending.push(Pending::Done(result));
            }
        }
    }

    // Collect results in archive order
    let mut files = Vec::with_capacity(file_count);
    for entry in pending {
        let result = match entry {
            Pending::Done(result) => result,
            Pending::Queued { filename, rx } => {
                let job_result = tokio::select! {
                    biased;
                    _ = tx.closed() => return Err("Client disconnected".to_string()),
                    r = rx => r,
                };
                let result = match job_result {
                    Ok(Ok(outcome)) => FileResultJson::from_outcome(outcome, format),
                    Ok(Err(e)) => FileResultJson::failed(filename, e.to_string()),
                    Err(_) => FileResultJson::failed(filename, "generation worker stopped"),
                };
                send(&tx, "file_complete", &result).await?;
                result
            }
        };
        files.push(result);
    }

    pool.shutdown().await;

    let succeeded = files.iter().filter(|f| f.success).count();
    tracing::info!(archive = %archive_name, file_count, succeeded, "archive finished");

    send(
        &tx,
        "complete",
        &CompleteEvent {
            filename: None,
            document: None,
            parse_mode: None,
            output: None,
            file_count: Some(file_count),
            files: Some(files),
        },
    )
    .await?;

    drop(temp_dir);
    Ok(())
}

async fn extract_member(member: &ArchiveMember) -> Result<ExtractedText, String> {
    let path = member.path.clone();
    let filename = member.filename.clone();
    tokio::task::spawn_blocking(move || {
        docscribe_ingest::extract_file(&path).map(|mut text| {
            text.filename = filename;
            text
        })
    })
    .await
    .map_err(|e| format!("Task join error: {}", e))?
    .map_err(|e| e.to_string())
}

/// Extract PDF text using blocking I/O (MuPDF is not async).
async fn extract_pdf_blocking(path: PathBuf, filename: String) -> Result<ExtractedText, String> {
    tokio::task::spawn_blocking(move || {
        let backend = docscribe_ingest::default_backend();
        docscribe_ingest::extract_pdf_with(Path::new(&path), &filename, backend.as_ref())
            .map_err(|e| format!("{}: PDF extraction failed: {}", filename, e))
    })
    .await
    .map_err(|e| format!("Task join error: {}", e))?
}

fn extraction_event(source: &ExtractedText) -> ExtractionCompleteEvent {
    ExtractionCompleteEvent {
        filename: source.filename.clone(),
        pages: source.page_count,
        chars: source.char_count(),
        words: source.word_count(),
    }
}

/// A key typed into the form wins over the server's configured backend.
fn select_backend(state: &AppState, fields: &FormFields) -> Result<Arc<dyn LlmBackend>, String> {
    if let Some(ref key) = fields.api_key {
        return Ok(Arc::new(OpenAiBackend::new(
            state.config.api_base.clone(),
            Some(key.clone()),
        )));
    }
    state.backend.clone().ok_or_else(|| {
        "No API key configured. Enter one in the form or set OPENAI_API_KEY on the server."
            .to_string()
    })
}

/// Per-request config: server settings with the form's model choice.
/// The rate limiter stays shared across requests.
fn build_config(state: &AppState, fields: &FormFields) -> Config {
    let mut config = state.config.clone();
    if let Some(ref model) = fields.model {
        config.model = model.clone();
    }
    config
}

async fn send<T: Serialize>(tx: &EventSender, event_type: &str, data: &T) -> Result<(), String> {
    tx.send(Ok(sse_event(event_type, data)))
        .await
        .map_err(|_| "Client disconnected".to_string())
}

/// Send a progress event from the sync callback via try_send (non-blocking).
fn send_progress_event(tx: &EventSender, event: &ProgressEvent) {
    let sse = match event {
        ProgressEvent::Generating {
            filename,
            model,
            input_chars,
            truncated,
        } => sse_event(
            "generating",
            &GeneratingEvent {
                filename: filename.clone(),
                model: model.clone(),
                input_chars: *input_chars,
                truncated: *truncated,
            },
        ),
        ProgressEvent::Retrying {
            filename,
            attempt,
            wait,
            reason,
        } => sse_event(
            "retrying",
            &RetryingEvent {
                filename: filename.clone(),
                attempt: *attempt,
                wait_secs: wait.as_secs_f64(),
                reason: reason.clone(),
            },
        ),
        // Results go out as file_complete / complete
        ProgressEvent::Generated { .. } | ProgressEvent::Failed { .. } => return,
    };
    let _ = tx.try_send(Ok(sse));
}
