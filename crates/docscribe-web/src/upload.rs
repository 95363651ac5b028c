use axum::extract::Multipart;
use docscribe_core::{Config, OutputFormat, Task};
use docscribe_ingest::FileType;

/// An uploaded file with its data and metadata.
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
    pub file_type: FileType,
}

/// Parsed form fields from the multipart upload.
pub struct FormFields {
    pub file: UploadedFile,
    pub task: Task,
    pub instructions: Option<String>,
    pub format: OutputFormat,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

/// Parse a multipart form upload into structured form fields.
///
/// Missing `task` and `format` fall back to the server defaults in `config`.
pub async fn parse_multipart(mut multipart: Multipart, config: &Config) -> Result<FormFields, String> {
    let mut file: Option<UploadedFile> = None;
    let mut task = config.default_task;
    let mut instructions: Option<String> = None;
    let mut format = config.default_format;
    let mut model: Option<String> = None;
    let mut api_key: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Failed to read form field: {}", e))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload.pdf").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| format!("Failed to read file data: {}", e))?
                    .to_vec();

                let file_type =
                    docscribe_ingest::detect_file_type(&filename, &data).map_err(|e| e.to_string())?;

                file = Some(UploadedFile {
                    filename,
                    data,
                    file_type,
                });
            }
            "task" => {
                let val = read_text(field, "task").await?;
                if let Some(val) = val {
                    task = val.parse()?;
                }
            }
            "format" => {
                let val = read_text(field, "format").await?;
                if let Some(val) = val {
                    format = val.parse()?;
                }
            }
            "instructions" => instructions = read_text(field, "instructions").await?,
            "model" => model = read_text(field, "model").await?,
            "api_key" => api_key = read_text(field, "api_key").await?,
            _ => {
                // Ignore unknown fields
                let _ = field.bytes().await;
            }
        }
    }

    let file = file.ok_or("No file uploaded")?;

    Ok(FormFields {
        file,
        task,
        instructions,
        format,
        model,
        api_key,
    })
}

/// Read a text field, treating blank values as absent.
async fn read_text(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<Option<String>, String> {
    let val = field
        .text()
        .await
        .map_err(|e| format!("Failed to read {}: {}", name, e))?;
    let val = val.trim();
    Ok((!val.is_empty()).then(|| val.to_string()))
}
