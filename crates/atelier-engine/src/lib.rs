use std::io::Cursor;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use atelier_contracts::events::{EventPayload, EventWriter};
use atelier_contracts::images::EncodedImage;
use atelier_contracts::session::{ChatMessage, MessageMeta, Role};
use atelier_contracts::styles::{
    seed_digest, FormKind, StyleProfile, StyleSelection, StyleSelector,
};
use image::imageops::FilterType;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const CANVAS_WIDTH: u32 = 512;
pub const CANVAS_HEIGHT: u32 = 512;

/// Fixed reply appended when a synthesis attempt fails. The iteration slot
/// is still consumed, so the next attempt picks up one past it.
pub const GENERATION_APOLOGY: &str = "I couldn't finish rendering that one. The style is still locked in, so send it again and I'll take another pass.";

const DEFAULT_SYNTHESIS_DEADLINE: Duration = Duration::from_secs(10);

/// One synthesis request. `iteration` only feeds the variation layer;
/// `base_image` switches the compositor into its restyle mode.
#[derive(Debug, Clone)]
pub struct ComposeRequest<'a> {
    pub prompt: &'a str,
    pub profile: &'a StyleProfile,
    pub iteration: u64,
    pub base_image: Option<&'a EncodedImage>,
}

/// The synthesis seam. Implementations must settle every call to a
/// self-contained encoded raster or a distinct error, never a partial image,
/// and must keep the profile's palette signature recognizable across calls.
pub trait Compositor {
    fn name(&self) -> &str;
    fn synthesize(&self, request: &ComposeRequest<'_>) -> Result<EncodedImage>;
}

/// Deterministic procedural renderer.
///
/// Fresh mode lays a palette gradient, places prompt-digest-driven forms, and
/// sprinkles iteration-seeded grain. Restyle mode decodes the base image and
/// re-maps its luminance onto the profile palette so the result visibly
/// derives from the original. All variation comes from content hashes; equal
/// requests produce byte-identical output.
pub struct ProceduralCompositor {
    deadline: Duration,
}

impl ProceduralCompositor {
    pub fn new() -> Self {
        Self {
            deadline: DEFAULT_SYNTHESIS_DEADLINE,
        }
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self { deadline }
    }

    fn check_deadline(&self, started: Instant) -> Result<()> {
        if started.elapsed() >= self.deadline {
            bail!(
                "synthesis timed out after {:.1}s",
                self.deadline.as_secs_f64()
            );
        }
        Ok(())
    }

    fn compose(&self, request: &ComposeRequest<'_>, started: Instant) -> Result<RgbImage> {
        let profile = request.profile;
        let layout = prompt_digest(request.prompt);
        let mut canvas = RgbImage::new(CANVAS_WIDTH, CANVAS_HEIGHT);

        let top = palette_color(profile, 0);
        let bottom = palette_color(profile, 1);
        for y in 0..CANVAS_HEIGHT {
            self.check_deadline(started)?;
            let t = y as f32 / (CANVAS_HEIGHT - 1) as f32;
            let row = lerp_color(top, bottom, t);
            for x in 0..CANVAS_WIDTH {
                canvas.put_pixel(x, y, Rgb(row));
            }
        }

        self.paint_forms(&mut canvas, request, &layout, 1.0, started)?;
        sprinkle_grain(
            &mut canvas,
            profile,
            &variation_digest(request.prompt, request.iteration),
        );
        Ok(canvas)
    }

    fn restyle(
        &self,
        encoded: &EncodedImage,
        request: &ComposeRequest<'_>,
        started: Instant,
    ) -> Result<RgbImage> {
        let (_, bytes) = encoded.decode()?;
        let decoded = image::load_from_memory(&bytes)
            .context("base image payload is not a decodable raster")?;
        let base = decoded
            .resize_exact(CANVAS_WIDTH, CANVAS_HEIGHT, FilterType::Triangle)
            .to_rgb8();

        let profile = request.profile;
        let wash = profile.wash.clamp(0.0, 1.0);
        let mut canvas = RgbImage::new(CANVAS_WIDTH, CANVAS_HEIGHT);
        for y in 0..CANVAS_HEIGHT {
            self.check_deadline(started)?;
            for x in 0..CANVAS_WIDTH {
                let source = base.get_pixel(x, y).0;
                let luma = (0.299 * f32::from(source[0])
                    + 0.587 * f32::from(source[1])
                    + 0.114 * f32::from(source[2]))
                    / 255.0;
                let washed = palette_ramp(profile, luma);
                canvas.put_pixel(x, y, Rgb(lerp_color(source, washed, wash)));
            }
        }

        // Accents stay faint so the base content remains legible.
        let layout = prompt_digest(request.prompt);
        self.paint_forms(&mut canvas, request, &layout, 0.35, started)?;
        sprinkle_grain(
            &mut canvas,
            profile,
            &variation_digest(request.prompt, request.iteration),
        );
        Ok(canvas)
    }

    fn paint_forms(
        &self,
        canvas: &mut RgbImage,
        request: &ComposeRequest<'_>,
        layout: &[u8; 32],
        alpha: f32,
        started: Instant,
    ) -> Result<()> {
        let profile = request.profile;
        let count = usize::from(profile.density).max(1) + usize::from(layout[0] % 3);
        for index in 0..count {
            self.check_deadline(started)?;
            let a = layout[(index * 5 + 1) % 32];
            let b = layout[(index * 5 + 2) % 32];
            let c = layout[(index * 5 + 3) % 32];
            let d = layout[(index * 5 + 4) % 32];
            let cx = (u32::from(a) * (CANVAS_WIDTH - 1)) / 255;
            let cy = (u32::from(b) * (CANVAS_HEIGHT - 1)) / 255;
            let extent = CANVAS_WIDTH / 8 + (u32::from(c) * CANVAS_WIDTH) / 1024;
            let color = form_color(profile, index);
            match profile.form {
                FormKind::Orbs => paint_orb(canvas, cx, cy, extent, color, alpha),
                FormKind::Bands => paint_band(canvas, cy, extent, d, color, alpha),
                FormKind::Facets => paint_facet(canvas, cx, cy, extent, d, color, alpha),
            }
        }
        Ok(())
    }
}

impl Default for ProceduralCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor for ProceduralCompositor {
    fn name(&self) -> &str {
        "procedural"
    }

    fn synthesize(&self, request: &ComposeRequest<'_>) -> Result<EncodedImage> {
        let started = Instant::now();
        let canvas = match request.base_image {
            Some(encoded) => self.restyle(encoded, request, started)?,
            None => self.compose(request, started)?,
        };
        encode_png(&canvas)
    }
}

fn prompt_digest(prompt: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.finalize().into()
}

fn variation_digest(prompt: &str, iteration: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(iteration.to_be_bytes());
    hasher.finalize().into()
}

struct Lcg {
    state: u64,
}

impl Lcg {
    fn from_digest(digest: &[u8; 32]) -> Self {
        let state = digest
            .iter()
            .take(8)
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        Self { state: state | 1 }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 32) as u32
    }
}

fn palette_color(profile: &StyleProfile, index: usize) -> [u8; 3] {
    if profile.palette.is_empty() {
        return [0, 0, 0];
    }
    profile.palette[index % profile.palette.len()]
}

fn form_color(profile: &StyleProfile, index: usize) -> [u8; 3] {
    let accents = profile.palette.len().saturating_sub(2).max(1);
    palette_color(profile, 2 + index % accents)
}

fn palette_ramp(profile: &StyleProfile, luma: f32) -> [u8; 3] {
    let stops = profile.palette.len();
    if stops == 0 {
        return [0, 0, 0];
    }
    if stops == 1 {
        return profile.palette[0];
    }
    let scaled = luma.clamp(0.0, 1.0) * (stops - 1) as f32;
    let lower = (scaled.floor() as usize).min(stops - 2);
    lerp_color(
        profile.palette[lower],
        profile.palette[lower + 1],
        scaled - lower as f32,
    )
}

fn lerp_channel(from: u8, to: u8, t: f32) -> u8 {
    (f32::from(from) + (f32::from(to) - f32::from(from)) * t)
        .round()
        .clamp(0.0, 255.0) as u8
}

fn lerp_color(from: [u8; 3], to: [u8; 3], t: f32) -> [u8; 3] {
    [
        lerp_channel(from[0], to[0], t),
        lerp_channel(from[1], to[1], t),
        lerp_channel(from[2], to[2], t),
    ]
}

fn blend(pixel: &mut Rgb<u8>, color: [u8; 3], alpha: f32) {
    for channel in 0..3 {
        pixel.0[channel] = lerp_channel(pixel.0[channel], color[channel], alpha);
    }
}

fn paint_orb(canvas: &mut RgbImage, cx: u32, cy: u32, radius: u32, color: [u8; 3], alpha: f32) {
    let radius = i64::from(radius.max(4));
    let cx = i64::from(cx);
    let cy = i64::from(cy);
    let x0 = (cx - radius).max(0);
    let x1 = (cx + radius).min(i64::from(CANVAS_WIDTH) - 1);
    let y0 = (cy - radius).max(0);
    let y1 = (cy + radius).min(i64::from(CANVAS_HEIGHT) - 1);
    let r2 = (radius * radius) as f32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x - cx;
            let dy = y - cy;
            let dist2 = (dx * dx + dy * dy) as f32;
            if dist2 <= r2 {
                let falloff = 1.0 - (dist2 / r2).sqrt();
                blend(
                    canvas.get_pixel_mut(x as u32, y as u32),
                    color,
                    alpha * (0.35 + 0.65 * falloff),
                );
            }
        }
    }
}

fn paint_band(
    canvas: &mut RgbImage,
    anchor: u32,
    thickness: u32,
    slope_byte: u8,
    color: [u8; 3],
    alpha: f32,
) {
    let slope = f32::from(slope_byte) / 255.0 - 0.5;
    let half = thickness.max(8) as f32 * 0.5;
    for x in 0..CANVAS_WIDTH {
        let center = anchor as f32 + slope * x as f32;
        let low = center - half;
        let high = center + half;
        if high < 0.0 || low > (CANVAS_HEIGHT - 1) as f32 {
            continue;
        }
        let y0 = low.max(0.0) as u32;
        let y1 = high.min((CANVAS_HEIGHT - 1) as f32) as u32;
        for y in y0..=y1 {
            let dist = (y as f32 - center).abs() / half;
            if dist <= 1.0 {
                blend(
                    canvas.get_pixel_mut(x, y),
                    color,
                    alpha * (0.3 + 0.7 * (1.0 - dist)),
                );
            }
        }
    }
}

fn paint_facet(
    canvas: &mut RgbImage,
    cx: u32,
    cy: u32,
    extent: u32,
    orientation: u8,
    color: [u8; 3],
    alpha: f32,
) {
    let extent = i64::from(extent.max(8));
    let (dx, dy) = match orientation % 4 {
        0 => (1i64, 0i64),
        1 => (-1, 0),
        2 => (0, 1),
        _ => (0, -1),
    };
    for step in 0..extent {
        let half = step / 2;
        let fade = 1.0 - step as f32 / extent as f32;
        let bx = i64::from(cx) + dx * step;
        let by = i64::from(cy) + dy * step;
        for offset in -half..=half {
            let (x, y) = if dx != 0 { (bx, by + offset) } else { (bx + offset, by) };
            if x >= 0 && y >= 0 && (x as u32) < CANVAS_WIDTH && (y as u32) < CANVAS_HEIGHT {
                blend(
                    canvas.get_pixel_mut(x as u32, y as u32),
                    color,
                    alpha * (0.25 + 0.55 * fade),
                );
            }
        }
    }
}

fn sprinkle_grain(canvas: &mut RgbImage, profile: &StyleProfile, variation: &[u8; 32]) {
    if profile.grain == 0 {
        return;
    }
    let mut rng = Lcg::from_digest(variation);
    let amplitude = i32::from(profile.grain);
    for pixel in canvas.pixels_mut() {
        let span = 2 * amplitude as u32 + 1;
        let offset = (rng.next_u32() % span) as i32 - amplitude;
        for channel in 0..3 {
            let value = i32::from(pixel.0[channel]) + offset;
            pixel.0[channel] = value.clamp(0, 255) as u8;
        }
    }
}

fn encode_png(canvas: &RgbImage) -> Result<EncodedImage> {
    let mut buffer = Cursor::new(Vec::new());
    canvas
        .write_to(&mut buffer, ImageFormat::Png)
        .context("failed to encode synthesized png")?;
    Ok(EncodedImage::from_bytes(buffer.get_ref(), "image/png"))
}

const CLAUSE_DELIMITERS: &[char] = &[',', ';', '.', ':', '!', '?', '\n'];

/// Short assistant caption built from the prompt's leading clauses and the
/// active style label. Presentation text only; nothing downstream parses it.
pub fn derive_caption(prompt: &str, style_label: &str, base_image_used: bool) -> String {
    let clauses: Vec<&str> = prompt
        .split(CLAUSE_DELIMITERS)
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .take(2)
        .collect();
    let subject = if clauses.is_empty() {
        prompt.trim().to_string()
    } else {
        clauses.join(", ")
    };
    if base_image_used {
        format!("{subject}, reworked over your image in the {style_label} style while keeping its identity.")
    } else {
        format!("{subject}, an original composition in the {style_label} style.")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    EmptyPrompt,
    Busy,
}

/// What a consumed iteration slot produced.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub message_id: String,
    pub style_id: String,
    pub iteration: u64,
}

/// Outcome of one submission. Rejections are normal branch values with zero
/// state change; `Failed` means the apology message was appended and the
/// iteration slot was still consumed.
#[derive(Debug, Clone)]
pub enum SubmitReply {
    Rejected(SubmitRejection),
    Completed(GenerationRecord),
    Failed(GenerationRecord),
}

/// Read-only view of the session for presentation layers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub busy: bool,
    pub active_style_id: Option<String>,
    pub base_image_label: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone)]
struct BaseImageSlot {
    image: EncodedImage,
    label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Generating,
}

/// Owns the conversation state and sequences the generation pipeline.
///
/// Single actor: one writer, synchronous transitions, at most one synthesis
/// in flight. `Phase` guards the only mutating entry point so a re-entrant
/// submission is refused instead of queued.
pub struct SessionEngine {
    session_id: String,
    events: EventWriter,
    selector: StyleSelector,
    compositor: Box<dyn Compositor>,
    messages: Vec<ChatMessage>,
    phase: Phase,
    active_style_id: Option<String>,
    iteration: u64,
    base_image: Option<BaseImageSlot>,
}

impl SessionEngine {
    pub fn new(events_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_compositor(events_path, Box::new(ProceduralCompositor::new()))
    }

    pub fn with_compositor(
        events_path: impl Into<PathBuf>,
        compositor: Box<dyn Compositor>,
    ) -> Result<Self> {
        let session_id = Uuid::new_v4().to_string();
        let events = EventWriter::new(events_path.into(), session_id.clone());
        events.emit(
            "session_started",
            map_object(json!({ "compositor": compositor.name() })),
        )?;
        Ok(Self {
            session_id,
            events,
            selector: StyleSelector::new(None),
            compositor,
            messages: Vec::new(),
            phase: Phase::Idle,
            active_style_id: None,
            iteration: 0,
            base_image: None,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn busy(&self) -> bool {
        self.phase == Phase::Generating
    }

    pub fn active_style_id(&self) -> Option<&str> {
        self.active_style_id.as_deref()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn base_image_label(&self) -> Option<&str> {
        self.base_image.as_ref().map(|slot| slot.label.as_str())
    }

    pub fn styles(&self) -> impl Iterator<Item = &StyleProfile> {
        self.selector.catalog.list()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            busy: self.busy(),
            active_style_id: self.active_style_id.clone(),
            base_image_label: self.base_image.as_ref().map(|slot| slot.label.clone()),
            messages: self.messages.clone(),
        }
    }

    /// Pins the sticky style. Unknown ids resolve to the catalog's first
    /// profile; the substitution is logged as a soft anomaly and reported in
    /// the returned selection, never surfaced as an error.
    pub fn select_style(&mut self, id: &str) -> Result<StyleSelection> {
        let selection = self.selector.resolve(id);
        if let Some(reason) = &selection.fallback_reason {
            self.events.emit(
                "style_fallback",
                map_object(json!({
                    "requested": &selection.requested,
                    "style_id": &selection.profile.id,
                    "reason": reason,
                })),
            )?;
        }
        self.active_style_id = Some(selection.profile.id.clone());
        self.events.emit(
            "style_selected",
            map_object(json!({
                "style_id": &selection.profile.id,
                "explicit": true,
            })),
        )?;
        Ok(selection)
    }

    pub fn set_base_image(
        &mut self,
        image: EncodedImage,
        label: impl Into<String>,
    ) -> Result<()> {
        let label = label.into();
        self.events
            .emit("base_image_set", map_object(json!({ "label": &label })))?;
        self.base_image = Some(BaseImageSlot { image, label });
        Ok(())
    }

    pub fn clear_base_image(&mut self) -> Result<bool> {
        let cleared = self.base_image.take().is_some();
        if cleared {
            self.events
                .emit("base_image_cleared", EventPayload::new())?;
        }
        Ok(cleared)
    }

    /// Adopts a prior assistant result as the next base image. Returns false
    /// when the id is unknown, not an assistant message, or carries no image.
    pub fn adopt_base_image(&mut self, message_id: &str) -> Result<bool> {
        let adopted = self
            .messages
            .iter()
            .find(|message| message.id == message_id && message.role == Role::Assistant)
            .and_then(|message| {
                message
                    .image
                    .clone()
                    .map(|image| (image, message.meta.as_ref().map(|meta| meta.iteration)))
            });
        let Some((image, iteration)) = adopted else {
            return Ok(false);
        };
        let label = match iteration {
            Some(value) => format!("result of iteration {value}"),
            None => format!("message {message_id}"),
        };
        self.events.emit(
            "base_image_adopted",
            map_object(json!({ "message_id": message_id, "label": &label })),
        )?;
        self.base_image = Some(BaseImageSlot { image, label });
        Ok(true)
    }

    /// Runs one full pipeline pass for a user submission.
    ///
    /// Empty-trimmed prompts and submissions while a generation is in flight
    /// are refused with no state change. Otherwise the user message is
    /// appended first, the style resolved (sticky after first use), the
    /// iteration counter consumed, and the compositor's settlement converted
    /// into either an image-bearing assistant message or the fixed apology.
    pub fn submit(&mut self, text: &str) -> Result<SubmitReply> {
        let prompt = text.trim();
        if prompt.is_empty() {
            return Ok(SubmitReply::Rejected(SubmitRejection::EmptyPrompt));
        }
        if self.phase == Phase::Generating {
            return Ok(SubmitReply::Rejected(SubmitRejection::Busy));
        }

        let user_id = self.next_message_id();
        self.messages.push(ChatMessage::user(user_id.clone(), prompt));
        self.events.emit(
            "user_message",
            map_object(json!({ "message_id": &user_id, "chars": prompt.len() })),
        )?;

        let profile = self.resolve_submission_style(prompt)?;
        self.iteration += 1;
        let iteration = self.iteration;
        let base = self.base_image.as_ref().map(|slot| slot.image.clone());
        let base_image_used = base.is_some();

        self.events.emit(
            "generation_started",
            map_object(json!({
                "iteration": iteration,
                "style_id": &profile.id,
                "base_image": base_image_used,
                "compositor": self.compositor.name(),
            })),
        )?;

        let request = ComposeRequest {
            prompt,
            profile: &profile,
            iteration,
            base_image: base.as_ref(),
        };
        let started = Instant::now();
        self.phase = Phase::Generating;
        let outcome = self.compositor.synthesize(&request);
        self.phase = Phase::Idle;
        let latency_s = started.elapsed().as_secs_f64();

        let assistant_id = self.next_message_id();
        match outcome {
            Ok(image) => {
                let caption = derive_caption(prompt, &profile.label, base_image_used);
                self.messages.push(ChatMessage::assistant(
                    assistant_id.clone(),
                    caption,
                    Some(image),
                    MessageMeta {
                        style_id: profile.id.clone(),
                        iteration,
                        base_image_used: Some(base_image_used),
                    },
                ));
                self.events.emit(
                    "generation_completed",
                    map_object(json!({
                        "iteration": iteration,
                        "message_id": &assistant_id,
                        "latency_s": latency_s,
                    })),
                )?;
                Ok(SubmitReply::Completed(GenerationRecord {
                    message_id: assistant_id,
                    style_id: profile.id.clone(),
                    iteration,
                }))
            }
            Err(err) => {
                self.messages.push(ChatMessage::assistant(
                    assistant_id.clone(),
                    GENERATION_APOLOGY,
                    None,
                    MessageMeta {
                        style_id: profile.id.clone(),
                        iteration,
                        base_image_used: None,
                    },
                ));
                self.events.emit(
                    "generation_failed",
                    map_object(json!({
                        "iteration": iteration,
                        "message_id": &assistant_id,
                        "latency_s": latency_s,
                        "error": format!("{err:#}"),
                    })),
                )?;
                Ok(SubmitReply::Failed(GenerationRecord {
                    message_id: assistant_id,
                    style_id: profile.id.clone(),
                    iteration,
                }))
            }
        }
    }

    fn resolve_submission_style(&mut self, prompt: &str) -> Result<StyleProfile> {
        if let Some(id) = self.active_style_id.clone() {
            let selection = self.selector.resolve(&id);
            if let Some(reason) = &selection.fallback_reason {
                self.events.emit(
                    "style_fallback",
                    map_object(json!({
                        "requested": &selection.requested,
                        "style_id": &selection.profile.id,
                        "reason": reason,
                    })),
                )?;
                self.active_style_id = Some(selection.profile.id.clone());
            }
            return Ok(selection.profile);
        }

        let profile = self.selector.pick(prompt).clone();
        self.active_style_id = Some(profile.id.clone());
        self.events.emit(
            "style_selected",
            map_object(json!({
                "style_id": &profile.id,
                "explicit": false,
                "seed_digest": seed_digest(prompt),
            })),
        )?;
        Ok(profile)
    }

    fn next_message_id(&self) -> String {
        format!("m{}", self.messages.len() + 1)
    }
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
