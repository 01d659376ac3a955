use std::{path::Path, sync::Arc, time::Duration};

use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use headless_chrome::{
    protocol::cdp::{Emulation, Page, DOM},
    Browser, Tab,
};
use lopdf::Document;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use common::{error::AppError, utils::llm::LlmClient};

use super::{PageText, PageTextSource};

const TEXT_LAYER_MIN_LEN: usize = 150;
const TEXT_LAYER_MIN_ASCII_RATIO: f64 = 0.7;
const TEXT_LAYER_MIN_LETTER_RATIO: f64 = 0.3;
const MAX_OCR_ATTEMPTS: usize = 2;
const OCR_PROMPT: &str = "Perform OCR. Remove watermarks, page numbers, and OCR noise. Preserve headings if possible.";
const OCR_PROMPT_RETRY: &str = "The page image is attached. Transcribe every visible line of text in reading order. Remove watermarks, page numbers, and OCR noise. Preserve headings.";
const VIEWPORT_WIDTH: u32 = 1_248;
const VIEWPORT_HEIGHT: u32 = 1_800;
const CANVAS_ATTEMPTS: usize = 12;
const CANVAS_WAIT_MS: u64 = 200;
const MIN_PAGE_IMAGE_BYTES: usize = 1_024;

/// Text layer first, vision OCR of a Chrome-rendered page image otherwise.
pub struct PdfPageExtractor {
    client: Arc<LlmClient>,
    model: String,
}

impl PdfPageExtractor {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn ocr_page(&self, png: &[u8]) -> Result<String, AppError> {
        let image_url = format!("data:image/png;base64,{}", STANDARD.encode(png));

        for attempt in 0..MAX_OCR_ATTEMPTS {
            let request = CreateChatCompletionRequestArgs::default()
                .model(self.model.clone())
                .messages([ChatCompletionRequestUserMessageArgs::default()
                    .content(vec![
                        ChatCompletionRequestMessageContentPartTextArgs::default()
                            .text(prompt_for_attempt(attempt))
                            .build()?
                            .into(),
                        ChatCompletionRequestMessageContentPartImageArgs::default()
                            .image_url(
                                ImageUrlArgs::default()
                                    .url(image_url.clone())
                                    .detail(ImageDetail::High)
                                    .build()?,
                            )
                            .build()?
                            .into(),
                    ])
                    .build()?
                    .into()])
                .build()?;

            let response = self.client.chat().create(request).await?;
            let Some(content) = response
                .choices
                .first()
                .and_then(|choice| choice.message.content.as_ref())
            else {
                warn!(attempt, "OCR response carried no content");
                continue;
            };

            if is_low_quality_response(content) {
                warn!(attempt, "OCR model returned an unusable transcription");
                continue;
            }

            debug!(attempt, chars = content.len(), "page transcribed");
            return Ok(content.trim().to_string());
        }

        Err(AppError::Processing(
            "OCR model did not return usable text".into(),
        ))
    }
}

#[async_trait]
impl PageTextSource for PdfPageExtractor {
    async fn extract_pages(
        &self,
        pdf: &Path,
    ) -> Result<Vec<Result<PageText, AppError>>, AppError> {
        let pdf_bytes = tokio::fs::read(pdf).await?;
        let page_numbers = load_page_numbers(pdf_bytes.clone()).await?;
        let text_layer = load_text_layer(pdf_bytes).await;

        let mut renderer: Option<PageRenderer> = None;
        let mut pages = Vec::with_capacity(page_numbers.len());

        for (idx, page_number) in page_numbers.iter().copied().enumerate() {
            if let Some(text) = text_layer.get(idx).filter(|text| looks_good_enough(text)) {
                pages.push(Ok(PageText {
                    text: text.clone(),
                    ocr: false,
                }));
                continue;
            }

            if renderer.is_none() {
                match PageRenderer::open(pdf) {
                    Ok(opened) => renderer = Some(opened),
                    Err(err) => {
                        pages.push(Err(err));
                        continue;
                    }
                }
            }
            let Some(active) = renderer.as_ref() else {
                continue;
            };

            let page = match active.render(page_number).await {
                Ok(png) => self.ocr_page(&png).await.map(|text| PageText { text, ocr: true }),
                Err(err) => Err(err),
            };
            pages.push(page);
        }

        Ok(pages)
    }
}

async fn load_page_numbers(pdf_bytes: Vec<u8>) -> Result<Vec<u32>, AppError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u32>, AppError> {
        let document = Document::load_mem(&pdf_bytes)
            .map_err(|err| AppError::Processing(format!("Failed to parse PDF: {err}")))?;
        let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();
        Ok(page_numbers)
    })
    .await?
}

/// Per-page text layer; empty when the PDF has none or it cannot be read.
async fn load_text_layer(pdf_bytes: Vec<u8>) -> Vec<String> {
    let extraction = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&pdf_bytes)
    })
    .await;

    match extraction {
        Ok(Ok(pages)) => pages.into_iter().map(|page| page.trim().to_string()).collect(),
        Ok(Err(err)) => {
            debug!(error = %err, "no usable text layer, every page goes to OCR");
            Vec::new()
        }
        Err(err) => {
            warn!(error = %err, "text layer extraction task failed");
            Vec::new()
        }
    }
}

/// Whether a text layer page reads like prose rather than scanner noise.
fn looks_good_enough(text: &str) -> bool {
    if text.len() < TEXT_LAYER_MIN_LEN {
        return false;
    }

    let total_chars = text.chars().count() as f64;
    if total_chars == 0.0 {
        return false;
    }

    let ascii_ratio = text.chars().filter(char::is_ascii).count() as f64 / total_chars;
    if ascii_ratio < TEXT_LAYER_MIN_ASCII_RATIO {
        return false;
    }

    let letter_ratio = text.chars().filter(|c| c.is_alphabetic()).count() as f64 / total_chars;
    letter_ratio > TEXT_LAYER_MIN_LETTER_RATIO
}

fn is_low_quality_response(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lowered = trimmed.to_ascii_lowercase();
    lowered.starts_with("i'm unable to")
        || lowered.starts_with("i am unable to")
        || lowered.starts_with("i cannot")
        || lowered.starts_with("i can't")
}

fn prompt_for_attempt(attempt: usize) -> &'static str {
    if attempt == 0 {
        OCR_PROMPT
    } else {
        OCR_PROMPT_RETRY
    }
}

/// One Chrome tab showing the PDF viewer, reused for every page of a document.
struct PageRenderer {
    _browser: Browser,
    tab: Arc<Tab>,
    file_url: url::Url,
}

impl PageRenderer {
    fn open(pdf: &Path) -> Result<Self, AppError> {
        let absolute = std::fs::canonicalize(pdf)?;
        let file_url = url::Url::from_file_path(&absolute)
            .map_err(|()| AppError::Processing("Unable to construct PDF file URL".into()))?;

        let browser = launch_browser()?;
        let tab = browser
            .new_tab()
            .map_err(|err| AppError::Processing(format!("Failed to create Chrome tab: {err}")))?;
        tab.set_default_timeout(Duration::from_secs(10));
        prepare_tab(&tab)?;

        Ok(Self {
            _browser: browser,
            tab,
            file_url,
        })
    }

    async fn render(&self, page_number: u32) -> Result<Vec<u8>, AppError> {
        let target = format!(
            "{}#page={page_number}&toolbar=0&statusbar=0&zoom=page-fit",
            self.file_url
        );
        self.tab
            .navigate_to(&target)
            .map_err(|err| AppError::Processing(format!("Failed to open PDF page: {err}")))?
            .wait_until_navigated()
            .map_err(|err| AppError::Processing(format!("PDF page navigation failed: {err}")))?;

        self.tab
            .wait_for_element_with_custom_timeout("embed", Duration::from_secs(8))
            .map_err(|err| AppError::Processing(format!("Timed out waiting for PDF viewer: {err}")))?;
        sleep(Duration::from_millis(350)).await;

        let mut clip = None;
        for attempt in 0..CANVAS_ATTEMPTS {
            match canvas_clip(&self.tab, page_number) {
                Ok(Some(found)) => {
                    clip = Some(found);
                    break;
                }
                Ok(None) if attempt.saturating_add(1) < CANVAS_ATTEMPTS => {
                    sleep(Duration::from_millis(CANVAS_WAIT_MS)).await;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(page = page_number, error = %err, "canvas lookup failed");
                    break;
                }
            }
        }
        if clip.is_none() {
            warn!(page = page_number, "page canvas not found, capturing whole viewport");
        }

        let png = capture_png(&self.tab, clip)?;
        if png.len() < MIN_PAGE_IMAGE_BYTES {
            warn!(page = page_number, bytes = png.len(), "page image suspiciously small");
        }
        debug!(page = page_number, bytes = png.len(), "rendered PDF page");
        Ok(png)
    }
}

fn launch_browser() -> Result<Browser, AppError> {
    #[cfg(feature = "docker")]
    {
        let options = headless_chrome::LaunchOptionsBuilder::default()
            .sandbox(false)
            .build()
            .map_err(|err| AppError::Processing(format!("Failed to launch Chrome: {err}")))?;
        Browser::new(options)
            .map_err(|err| AppError::Processing(format!("Failed to start Chrome: {err}")))
    }
    #[cfg(not(feature = "docker"))]
    {
        Browser::default()
            .map_err(|err| AppError::Processing(format!("Failed to start Chrome: {err}")))
    }
}

fn prepare_tab(tab: &Tab) -> Result<(), AppError> {
    tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
        color: Some(DOM::RGBA {
            r: 255,
            g: 255,
            b: 255,
            a: Some(1.0),
        }),
    })
    .map_err(|err| AppError::Processing(format!("Failed to set page background: {err}")))?;

    tab.call_method(Emulation::SetDeviceMetricsOverride {
        width: VIEWPORT_WIDTH,
        height: VIEWPORT_HEIGHT,
        device_scale_factor: 1.0,
        mobile: false,
        scale: None,
        screen_width: Some(VIEWPORT_WIDTH),
        screen_height: Some(VIEWPORT_HEIGHT),
        position_x: None,
        position_y: None,
        dont_set_visible_size: Some(false),
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    })
    .map_err(|err| AppError::Processing(format!("Failed to size Chrome viewport: {err}")))?;

    Ok(())
}

fn canvas_clip(tab: &Tab, page_number: u32) -> Result<Option<Page::Viewport>, AppError> {
    let script = format!(
        r#"(function() {{
            const embed = document.querySelector('embed');
            if (!embed || !embed.shadowRoot) return null;
            const viewer = embed.shadowRoot.querySelector('pdf-viewer');
            if (!viewer || !viewer.shadowRoot) return null;
            const canvas = viewer.shadowRoot.querySelector('canvas[aria-label="Page {page_number}"]');
            if (!canvas) return null;
            canvas.scrollIntoView({{ block: 'start' }});
            const rect = canvas.getBoundingClientRect();
            return {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height }};
        }})()"#
    );

    let result = tab
        .evaluate(&script, false)
        .map_err(|err| AppError::Processing(format!("Failed to inspect PDF canvas: {err}")))?;

    let Some(value) = result.value.filter(|value| !value.is_null()) else {
        return Ok(None);
    };

    let field = |name: &str| value.get(name).and_then(Value::as_f64).unwrap_or_default();
    let (width, height) = (field("width"), field("height"));
    if width <= 0.0 || height <= 0.0 {
        return Ok(None);
    }

    Ok(Some(Page::Viewport {
        x: field("x").max(0.0),
        y: field("y").max(0.0),
        width,
        height,
        scale: 1.0,
    }))
}

fn capture_png(tab: &Tab, clip: Option<Page::Viewport>) -> Result<Vec<u8>, AppError> {
    let screenshot = tab
        .call_method(Page::CaptureScreenshot {
            format: Some(Page::CaptureScreenshotFormatOption::Png),
            quality: None,
            clip,
            from_surface: Some(true),
            capture_beyond_viewport: Some(true),
            optimize_for_speed: Some(false),
        })
        .map_err(|err| AppError::Processing(format!("Failed to capture PDF page: {err}")))?;

    STANDARD
        .decode(screenshot.data)
        .map_err(|err| AppError::Processing(format!("Failed to decode page screenshot: {err}")))
}
