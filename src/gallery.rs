use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pulldown_cmark::Parser;
use pulldown_cmark::html::push_html;
use regex::{Captures, Regex};
use tracing::info;

use crate::model::{CaseReport, GalleryImage, Modality, RegistrationStatus};
use crate::util::write_atomic;

const STYLES: &str = r#"
<style>
    img {
        max-width: 90%;
        display: block;
    }
    .img-container {
        display: flex;
        align-items: center;
        margin: 10px 0;
    }
    .img-title {
        font-size: 1em;
        margin-right: 10px;
        width: 150px;
        overflow: hidden;
        white-space: normal;
    }
    body {
        font-size: 1.5em;
        font-family: Arial, sans-serif;
    }
</style>
"#;

/// Running Markdown gallery; one section is appended per processed case.
#[derive(Debug, Clone)]
pub struct Gallery {
    path: PathBuf,
}

impl Gallery {
    pub fn open(path: &Path, title: &str) -> Result<Self> {
        if !path.exists() {
            write_atomic(path, format!("## {title}\n\n").as_bytes())?;
            info!(path = %path.display(), "initialised markdown gallery");
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_case(&self, report: &CaseReport) -> Result<()> {
        let section = case_markdown(report);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(section.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }

    pub fn render_html(&self, html_path: &Path) -> Result<()> {
        let markdown = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let body = markdown_to_html(&markdown)?;
        let document =
            format!("<!DOCTYPE html>\n<html>\n<head>{STYLES}</head>\n<body>{body}</body>\n</html>");
        write_atomic(html_path, document.as_bytes())?;
        info!(path = %html_path.display(), "wrote html gallery");
        Ok(())
    }
}

pub fn case_markdown(report: &CaseReport) -> String {
    let mut out = String::new();
    out.push_str("---\n\n");
    out.push_str(&format!("### Case: {}\n\n", report.case));

    for image in &report.images {
        push_image(&mut out, image);
    }

    for modality in Modality::MOVING {
        if let RegistrationStatus::Registered {
            dice: Some(dice), ..
        } = report.outcome(modality)
        {
            out.push_str(&format!(
                "**{} Dice**: mean {:.3}, std {:.3}\n\n",
                modality.image_label(),
                dice.mean,
                dice.std
            ));
        }
    }

    out
}

fn push_image(out: &mut String, image: &GalleryImage) {
    out.push_str(&format!("##### {}\n\n", image.description));
    out.push_str(&format!("![{}]({})\n\n", image.description, image.path));
}

/// Renders the gallery Markdown. Captioned images whose heading repeats the
/// alt text are first folded into `img-container` blocks, which pass through
/// as raw HTML.
pub fn markdown_to_html(markdown: &str) -> Result<String> {
    let captioned = Regex::new(r"(?m)^##### (.*?)\n\n!\[(.*?)\]\((.*?)\)$")
        .context("failed to compile captioned image regex")?;
    let grouped = captioned.replace_all(markdown, |caps: &Captures<'_>| {
        if caps[1] != caps[2] {
            return caps[0].to_string();
        }
        format!(
            r#"<div class="img-container"><span class="img-title">{}</span><img src="{}" alt="{}"></div>"#,
            escape_html(&caps[1]),
            escape_html(&caps[3]),
            escape_html(&caps[1])
        )
    });

    let mut html = String::new();
    push_html(&mut html, Parser::new(&grouped));
    Ok(html)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
