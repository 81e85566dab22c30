use base64::Engine as _;
use regex::{Captures, Regex};
use std::sync::OnceLock;
use uuid::Uuid;

/// An embedded image lifted out of the HTML body, to be emitted as an inline
/// part of the `multipart/related` subtree.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub content_id: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn data_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"src\s*=\s*["']data:image/([a-zA-Z0-9.+\-]+);base64,([^"']+)["']"#)
            .expect("data url regex")
    })
}

/// Rewrite every `src="data:image/...;base64,..."` reference to a `cid:`
/// reference, collecting the decoded payloads. Images whose payload does not
/// decode are left untouched and reported as warnings.
pub fn rewrite_data_urls(html: &str) -> (String, Vec<InlineImage>, Vec<String>) {
    let mut images = Vec::new();
    let mut warnings = Vec::new();

    let rewritten = data_url_re().replace_all(html, |caps: &Captures<'_>| {
        let subtype = &caps[1];
        let payload: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();

        match base64::engine::general_purpose::STANDARD.decode(&payload) {
            Ok(bytes) => {
                let content_id = format!("{}@mailspool", Uuid::new_v4().simple());
                images.push(InlineImage {
                    content_id: content_id.clone(),
                    content_type: format!("image/{subtype}"),
                    bytes,
                });
                format!(r#"src="cid:{content_id}""#)
            }
            Err(e) => {
                warnings.push(format!(
                    "embedded image/{subtype} payload is not valid base64, left as data URL: {e}"
                ));
                caps[0].to_string()
            }
        }
    });

    (rewritten.into_owned(), images, warnings)
}

fn head_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<head[^>]*>").expect("head regex"))
}

fn img_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<img\b[^>]*>").expect("img regex"))
}

fn body_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<body\b[^>]*>").expect("body regex"))
}

/// Best-effort mobile and accessibility touch-ups: viewport/charset metas,
/// responsive image styling, alt text, body font normalization. Anything the
/// markup does not allow is simply skipped.
pub fn optimize_for_clients(html: &str) -> String {
    let mut output = html.to_string();
    let lowered = output.to_lowercase();

    if let Some(head_end) = head_re().find(&output).map(|m| m.end()) {
        let mut metas = String::new();
        if !lowered.contains("name=\"viewport\"") && !lowered.contains("name='viewport'") {
            metas.push_str(r#"<meta name="viewport" content="width=device-width, initial-scale=1.0">"#);
        }
        if !lowered.contains("charset") {
            metas.push_str(r#"<meta charset="UTF-8">"#);
        }
        if !metas.is_empty() {
            output.insert_str(head_end, &metas);
        }
    }

    output = img_tag_re()
        .replace_all(&output, |caps: &Captures<'_>| {
            let tag = &caps[0];
            let tag_lower = tag.to_lowercase();
            let mut additions = String::new();
            if !tag_lower.contains("width") && !tag_lower.contains("style") {
                additions.push_str(r#" style="max-width:100%; height:auto; display:block""#);
            }
            if !tag_lower.contains("alt=") {
                additions.push_str(r#" alt="Image""#);
            }
            if additions.is_empty() {
                tag.to_string()
            } else {
                let insert_at = tag.len() - if tag.ends_with("/>") { 2 } else { 1 };
                format!("{}{}{}", &tag[..insert_at], additions, &tag[insert_at..])
            }
        })
        .into_owned();

    output = body_tag_re()
        .replace_all(&output, |caps: &Captures<'_>| {
            let tag = &caps[0];
            if tag.to_lowercase().contains("style") {
                tag.to_string()
            } else {
                let insert_at = tag.len() - 1;
                format!(
                    r#"{} style="margin:0; padding:0; font-family:Arial, Helvetica, sans-serif;"{}"#,
                    &tag[..insert_at],
                    &tag[insert_at..]
                )
            }
        })
        .into_owned();

    output
}
