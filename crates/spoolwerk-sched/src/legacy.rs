// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Compatibility shim for the filter/backend process contract.
//
// Filters and backends are external programs written against a fixed calling
// convention:
//
//   argv = [printer, job-id, user, title, copies, options, file?]
//
// with job options flattened into one space-separated string and the rest of
// the context passed through the environment.  Everything in this module
// renders scheduler state into that shape; nothing else depends on it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use spoolwerk_core::attributes::{AttrGroup, AttrValue, AttributeSet, ResolutionUnits, ValueTag};
use spoolwerk_core::config::SchedulerConfig;

/// `job-*` attributes that still reach local filters.
const JOB_ATTRIBUTE_ALLOW_LIST: &[&str] = &["job-billing", "job-sheets", "job-hold-until", "job-priority"];

/// Characters escaped with a backslash inside option values.
const ESCAPED_CHARS: &[char] = &[' ', '\t', '\n', '\\', '\'', '"'];

/// Flatten job attributes into the filter options string.
///
/// Remote destinations receive every `job-*` attribute so the remote
/// scheduler can reconstruct the job; local filters only see the allow-list.
pub fn options_string(attributes: &AttributeSet, remote: bool) -> String {
    let mut options = String::new();

    for attr in attributes.iter() {
        if attr.group == AttrGroup::Operation || attr.values.is_empty() {
            continue;
        }
        if matches!(
            attr.tag,
            ValueTag::MimeMediaType
                | ValueTag::NameWithLanguage
                | ValueTag::TextWithLanguage
                | ValueTag::Uri
                | ValueTag::UriScheme
        ) {
            continue;
        }
        if attr.name.starts_with("time-") {
            continue;
        }
        if attr.name.starts_with("job-") && !remote && !JOB_ATTRIBUTE_ALLOW_LIST.contains(&attr.name.as_str()) {
            continue;
        }

        if !options.is_empty() {
            options.push(' ');
        }
        if attr.tag != ValueTag::Boolean {
            options.push_str(&attr.name);
            options.push('=');
        }
        for (i, value) in attr.values.iter().enumerate() {
            if i > 0 {
                options.push(',');
            }
            render_value(&mut options, &attr.name, value);
        }
    }
    options
}

fn render_value(out: &mut String, name: &str, value: &AttrValue) {
    match value {
        AttrValue::Boolean(flag) => {
            if !flag {
                out.push_str("no");
            }
            out.push_str(name);
        }
        AttrValue::Integer(n) => out.push_str(&n.to_string()),
        AttrValue::Range(lo, hi) if lo == hi => out.push_str(&lo.to_string()),
        AttrValue::Range(lo, hi) => out.push_str(&format!("{lo}-{hi}")),
        AttrValue::Resolution { x, y, units } => {
            let units = match units {
                ResolutionUnits::PerInch => "dpi",
                ResolutionUnits::PerCm => "dpcm",
            };
            out.push_str(&format!("{x}x{y}{units}"));
        }
        AttrValue::String(s) => escape_into(out, s),
    }
}

fn escape_into(out: &mut String, value: &str) {
    for c in value.chars() {
        if ESCAPED_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// `LANG` value from `attributes-natural-language`: `ll`, `ll_CC`, or `C`.
pub fn lang_from_attributes(attributes: &AttributeSet) -> String {
    let Some(lang) = attributes.get_string("attributes-natural-language") else {
        return "C".into();
    };
    let bytes = lang.as_bytes();
    match bytes.len() {
        2 if lang.is_ascii() => lang.to_ascii_lowercase(),
        5 if lang.is_ascii() && matches!(bytes[2], b'-' | b'_') => {
            format!("{}_{}", lang[..2].to_ascii_lowercase(), lang[3..].to_ascii_uppercase())
        }
        _ => "C".into(),
    }
}

/// `CHARSET` value: the document format's `charset=` parameter, else the
/// request's `attributes-charset`, else the configured default.
pub fn charset_from_attributes(attributes: &AttributeSet, default: &str) -> String {
    let from_format = attributes.get_string("document-format").and_then(|format| {
        let (_, param) = format.split_once("charset=")?;
        let charset = param.split(';').next()?.trim();
        (!charset.is_empty()).then(|| charset.to_string())
    });
    from_format
        .or_else(|| attributes.get_string("attributes-charset").map(str::to_string))
        .unwrap_or_else(|| default.to_string())
}

/// Strip `user:password@` from a device URI so it can be shown in `ps`.
pub fn sanitize_device_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://{}", &rest[at + 1..]),
        None => uri.to_string(),
    }
}

/// Scheme of a device URI (`socket`, `ipp`, `file`, ...).
pub fn uri_scheme(uri: &str) -> &str {
    uri.split_once(':').map(|(scheme, _)| scheme).unwrap_or(uri)
}

/// Local path of a `file:` device URI.
pub fn file_uri_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file:")?;
    let path = rest.strip_prefix("//").unwrap_or(rest);
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// The fixed argument vector shared by every stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyArgs {
    pub printer: String,
    pub job_id: u32,
    pub user: String,
    pub title: String,
    pub copies: u32,
    pub options: String,
    /// Spool file; only the first stage reads it by name.
    pub file: Option<PathBuf>,
}

impl LegacyArgs {
    /// `argv[1..]` for a stage.  `with_file` selects whether the spool file
    /// name is passed.
    pub fn tail(&self, with_file: bool) -> Vec<String> {
        let mut args = vec![
            self.job_id.to_string(),
            self.user.clone(),
            self.title.clone(),
            self.copies.to_string(),
            self.options.clone(),
        ];
        if let (true, Some(file)) = (with_file, &self.file) {
            args.push(file.display().to_string());
        }
        args
    }
}

/// Inputs to the filter environment.
#[derive(Debug, Clone, Copy)]
pub struct EnvContext<'a> {
    pub config: &'a SchedulerConfig,
    pub printer: &'a str,
    pub device_uri: &'a str,
    pub content_type: &'a str,
    /// Class the job was queued on, when it came through a class.
    pub class: Option<&'a str>,
    pub attributes: &'a AttributeSet,
}

/// Build the environment block for filters and backends.
pub fn build_env(ctx: &EnvContext<'_>) -> BTreeMap<String, String> {
    let cfg = ctx.config;
    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };

    set("PATH", cfg.filter_path.clone());
    set("SOFTWARE", format!("Spoolwerk/{}", env!("CARGO_PKG_VERSION")));
    set("USER", cfg.run_user.clone());
    set("LANG", lang_from_attributes(ctx.attributes));
    set("CHARSET", charset_from_attributes(ctx.attributes, &cfg.default_charset));
    set("PPD", ppd_path(&cfg.server_root, ctx.printer).display().to_string());
    set("SERVER_ROOT", cfg.server_root.display().to_string());
    set("DATADIR", cfg.data_dir.display().to_string());
    set("TMPDIR", cfg.tmp_dir.display().to_string());
    set("DEVICE_URI", ctx.device_uri.to_string());
    set("PRINTER", ctx.printer.to_string());
    set("CONTENT_TYPE", ctx.content_type.to_string());
    if let Ok(tz) = std::env::var("TZ") {
        set("TZ", tz);
    }
    if let Some(classification) = &cfg.classification {
        set("CLASSIFICATION", classification.clone());
    }
    if let Some(class) = ctx.class {
        set("CLASS", class.to_string());
    }
    env
}

/// `<server_root>/ppd/<printer>.ppd`.
pub fn ppd_path(server_root: &Path, printer: &str) -> PathBuf {
    server_root.join("ppd").join(format!("{printer}.ppd"))
}
