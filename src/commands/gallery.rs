use anyhow::{Result, bail};
use tracing::info;

use crate::cli::GalleryArgs;
use crate::config::PipelineConfig;
use crate::gallery::Gallery;

pub fn run(args: GalleryArgs) -> Result<()> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    let markdown_path = args.save_dir.join(&config.markdown_file_name);
    if !markdown_path.is_file() {
        bail!("markdown gallery not found: {}", markdown_path.display());
    }

    let gallery = Gallery::open(&markdown_path, &config.markdown_title)?;
    let html_path = args.save_dir.join(&config.html_file_name);
    gallery.render_html(&html_path)?;
    info!(
        markdown = %gallery.path().display(),
        html = %html_path.display(),
        "gallery rendered"
    );
    Ok(())
}
