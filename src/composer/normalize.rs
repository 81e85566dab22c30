use crate::queue::models::AttachmentData;
use base64::Engine as _;

/// Split a raw recipient list on commas and semicolons, trimming and
/// dropping empty fragments.
pub fn parse_address_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Partition a raw list into syntactically valid and invalid addresses.
pub fn parse_valid_addresses(raw: &str) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for address in parse_address_list(raw) {
        if validator::validate_email(&address) {
            valid.push(address);
        } else {
            invalid.push(address);
        }
    }
    (valid, invalid)
}

/// An attachment with its payload materialized in memory. On the wire the
/// content is base64; from here on it is raw bytes.
#[derive(Debug, Clone)]
pub struct LoadedAttachment {
    pub file_name: String,
    pub content_type: String,
    pub content_id: String,
    pub is_inline: bool,
    pub bytes: Vec<u8>,
}

/// Materialize attachment payloads: decode base64 content or read the file
/// behind `file_path`. Unusable attachments are skipped with a warning; the
/// message still goes out with whatever survived.
pub async fn load_attachments(
    attachments: &[AttachmentData],
    warnings: &mut Vec<String>,
) -> Vec<LoadedAttachment> {
    let mut loaded = Vec::with_capacity(attachments.len());

    for attachment in attachments {
        let file_name = if attachment.file_name.trim().is_empty() {
            "attachment".to_string()
        } else {
            attachment.file_name.clone()
        };

        let bytes = match (&attachment.content, &attachment.file_path) {
            (Some(content), _) => {
                let stripped: String = content.chars().filter(|c| !c.is_whitespace()).collect();
                if stripped.is_empty() {
                    warnings.push(format!("attachment '{file_name}' has empty content, skipped"));
                    continue;
                }
                match base64::engine::general_purpose::STANDARD.decode(&stripped) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warnings.push(format!(
                            "attachment '{file_name}' has invalid base64 content, skipped: {e}"
                        ));
                        continue;
                    }
                }
            }
            (None, Some(path)) => match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warnings.push(format!(
                        "attachment '{file_name}' could not be read from {path}: {e}"
                    ));
                    continue;
                }
            },
            (None, None) => {
                warnings.push(format!("attachment '{file_name}' has no content, skipped"));
                continue;
            }
        };

        let content_type = if attachment.content_type.trim().is_empty()
            || attachment.content_type == "application/octet-stream"
        {
            attachment
                .file_path
                .as_deref()
                .map(|path| mime_guess::from_path(path).first_or_octet_stream().to_string())
                .unwrap_or_else(|| {
                    if attachment.content_type.trim().is_empty() {
                        "application/octet-stream".to_string()
                    } else {
                        attachment.content_type.clone()
                    }
                })
        } else {
            attachment.content_type.clone()
        };

        let content_id = attachment
            .content_id
            .clone()
            .unwrap_or_else(|| format!("{}@mailspool", uuid::Uuid::new_v4().simple()));

        loaded.push(LoadedAttachment {
            file_name,
            content_type,
            content_id,
            is_inline: attachment.is_inline,
            bytes,
        });
    }

    loaded
}
