//! Document serialization collaborators.
//!
//! The bridge never interprets elements or app-state itself; it goes through
//! a [`DocumentSerializer`]. [`StorageSerializer`] is the built-in
//! implementation used by the CLI and the tests.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::trace;

use xenote_core::config::Config;
use xenote_core::document::{AppState, BinaryFiles, Element, VIEW_BACKGROUND_COLOR};
use xenote_core::error::{Result, XenoteError};

/// Padding around the exported drawing, in SVG user units.
pub const EXPORT_PADDING: f64 = 10.0;

/// Options passed to [`DocumentSerializer::export_to_svg`].
#[derive(Debug, Clone, PartialEq)]
pub struct SvgExportOptions {
    /// Paint the background colour behind the drawing.
    pub export_background: bool,
    pub view_background_color: Option<String>,
    pub export_padding: f64,
}

impl Default for SvgExportOptions {
    fn default() -> Self {
        Self {
            export_background: true,
            view_background_color: None,
            export_padding: EXPORT_PADDING,
        }
    }
}

/// Element/app-state helpers of the drawing engine.
#[async_trait]
pub trait DocumentSerializer: Send + Sync + 'static {
    /// Elements as they should be persisted.
    fn clear_elements_for_storage(&self, elements: &[Element]) -> Vec<Element>;

    /// App-state as it should be persisted.
    fn clear_app_state_for_storage(&self, app_state: &AppState) -> AppState;

    /// A fresh default app-state.
    fn default_app_state(&self) -> AppState;

    /// Elements not marked as deleted.
    fn non_deleted_elements(&self, elements: &[Element]) -> Vec<Element>;

    /// Render `elements` to SVG markup.
    async fn export_to_svg(
        &self,
        elements: &[Element],
        options: &SvgExportOptions,
        files: Option<&BinaryFiles>,
    ) -> Result<String>;
}

/// Built-in serializer: key-allowlist app-state sanitizing and a flat SVG
/// renderer.
#[derive(Debug, Clone)]
pub struct StorageSerializer {
    app_state_keys: Vec<String>,
    default_overrides: AppState,
}

impl Default for StorageSerializer {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl StorageSerializer {
    pub fn new(app_state_keys: Vec<String>, default_overrides: AppState) -> Self {
        Self {
            app_state_keys,
            default_overrides,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.app_state_keys(), config.default_app_state_overrides())
    }
}

fn is_deleted(element: &Element) -> bool {
    element
        .get("isDeleted")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn element_type(element: &Element) -> &str {
    element.get("type").and_then(Value::as_str).unwrap_or("")
}

fn is_linear(element: &Element) -> bool {
    matches!(element_type(element), "line" | "arrow")
}

#[async_trait]
impl DocumentSerializer for StorageSerializer {
    fn clear_elements_for_storage(&self, elements: &[Element]) -> Vec<Element> {
        elements
            .iter()
            .filter(|e| !is_deleted(e) && element_type(e) != "selection")
            .map(|e| {
                let mut element = e.clone();
                if is_linear(&element) {
                    if let Some(obj) = element.as_object_mut() {
                        obj.insert("lastCommittedPoint".into(), Value::Null);
                    }
                }
                element
            })
            .collect()
    }

    fn clear_app_state_for_storage(&self, app_state: &AppState) -> AppState {
        app_state
            .iter()
            .filter(|(key, _)| self.app_state_keys.iter().any(|k| k == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn default_app_state(&self) -> AppState {
        let mut state = match json!({
            "viewBackgroundColor": "#ffffff",
            "theme": "light",
            "gridSize": null,
            "name": "",
            "zoom": { "value": 1 },
            "scrollX": 0,
            "scrollY": 0,
            "currentItemStrokeColor": "#1e1e1e",
            "currentItemBackgroundColor": "transparent",
            "currentItemFillStyle": "solid",
            "currentItemStrokeWidth": 2,
            "currentItemRoughness": 1,
            "currentItemOpacity": 100,
            "currentItemFontFamily": 1,
            "currentItemFontSize": 20,
            "currentItemTextAlign": "left",
            "viewModeEnabled": false,
            "zenModeEnabled": false,
            "exportBackground": true,
            "exportWithDarkMode": false
        }) {
            Value::Object(map) => map,
            _ => AppState::new(),
        };
        for (key, value) in &self.default_overrides {
            state.insert(key.clone(), value.clone());
        }
        state
    }

    fn non_deleted_elements(&self, elements: &[Element]) -> Vec<Element> {
        elements.iter().filter(|e| !is_deleted(e)).cloned().collect()
    }

    async fn export_to_svg(
        &self,
        elements: &[Element],
        options: &SvgExportOptions,
        files: Option<&BinaryFiles>,
    ) -> Result<String> {
        render_svg(elements, options, files)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Bounds {
    fn include(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}

fn num(element: &Element, key: &str) -> f64 {
    element.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn str_or<'a>(element: &'a Element, key: &str, fallback: &'a str) -> &'a str {
    element.get(key).and_then(Value::as_str).unwrap_or(fallback)
}

/// Points of a linear element, relative to its `x`/`y`.
fn points(element: &Element) -> Vec<(f64, f64)> {
    element
        .get("points")
        .and_then(Value::as_array)
        .map(|pts| {
            pts.iter()
                .filter_map(|p| {
                    let p = p.as_array()?;
                    Some((p.first()?.as_f64()?, p.get(1)?.as_f64()?))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn scene_bounds(elements: &[Element]) -> Option<Bounds> {
    let mut bounds: Option<Bounds> = None;
    for element in elements {
        let (x, y) = (num(element, "x"), num(element, "y"));
        let mut corners = vec![(x, y), (x + num(element, "width"), y + num(element, "height"))];
        corners.extend(points(element).into_iter().map(|(px, py)| (x + px, y + py)));
        for (cx, cy) in corners {
            bounds
                .get_or_insert(Bounds {
                    min_x: cx,
                    min_y: cy,
                    max_x: cx,
                    max_y: cy,
                })
                .include(cx, cy);
        }
    }
    bounds
}

fn fmt_num(v: f64) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        format!("{rounded}")
    }
}

fn attr(value: &str) -> std::borrow::Cow<'_, str> {
    html_escape::encode_double_quoted_attribute(value)
}

fn render_svg(
    elements: &[Element],
    options: &SvgExportOptions,
    files: Option<&BinaryFiles>,
) -> Result<String> {
    let pad = options.export_padding;
    let bounds = scene_bounds(elements).unwrap_or(Bounds {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 0.0,
        max_y: 0.0,
    });
    let width = bounds.max_x - bounds.min_x + pad * 2.0;
    let height = bounds.max_y - bounds.min_y + pad * 2.0;
    let dx = pad - bounds.min_x;
    let dy = pad - bounds.min_y;

    let mut svg = String::new();
    write_svg(&mut svg, elements, options, files, width, height, dx, dy)
        .map_err(|e| XenoteError::Export(e.to_string()))?;
    trace!(elements = elements.len(), bytes = svg.len(), "Rendered SVG");
    Ok(svg)
}

#[allow(clippy::too_many_arguments)]
fn write_svg(
    out: &mut String,
    elements: &[Element],
    options: &SvgExportOptions,
    files: Option<&BinaryFiles>,
    width: f64,
    height: f64,
    dx: f64,
    dy: f64,
) -> std::fmt::Result {
    let (w, h) = (fmt_num(width), fmt_num(height));
    write!(
        out,
        r#"<svg version="1.1" xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#
    )?;

    if options.export_background {
        if let Some(color) = &options.view_background_color {
            write!(
                out,
                r#"<rect x="0" y="0" width="{w}" height="{h}" fill="{}"/>"#,
                attr(color)
            )?;
        }
    }

    for element in elements {
        let x = num(element, "x") + dx;
        let y = num(element, "y") + dy;
        let ew = num(element, "width");
        let eh = num(element, "height");
        let stroke = attr(str_or(element, "strokeColor", "#1e1e1e"));
        let fill = attr(str_or(element, "backgroundColor", "transparent"));
        let stroke_width = fmt_num(element.get("strokeWidth").and_then(Value::as_f64).unwrap_or(2.0));

        match element_type(element) {
            "rectangle" => write!(
                out,
                r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{fill}" stroke="{stroke}" stroke-width="{stroke_width}"/>"#,
                fmt_num(x),
                fmt_num(y),
                fmt_num(ew),
                fmt_num(eh)
            )?,
            "ellipse" => write!(
                out,
                r#"<ellipse cx="{}" cy="{}" rx="{}" ry="{}" fill="{fill}" stroke="{stroke}" stroke-width="{stroke_width}"/>"#,
                fmt_num(x + ew / 2.0),
                fmt_num(y + eh / 2.0),
                fmt_num(ew / 2.0),
                fmt_num(eh / 2.0)
            )?,
            "diamond" => write!(
                out,
                r#"<polygon points="{},{} {},{} {},{} {},{}" fill="{fill}" stroke="{stroke}" stroke-width="{stroke_width}"/>"#,
                fmt_num(x + ew / 2.0),
                fmt_num(y),
                fmt_num(x + ew),
                fmt_num(y + eh / 2.0),
                fmt_num(x + ew / 2.0),
                fmt_num(y + eh),
                fmt_num(x),
                fmt_num(y + eh / 2.0)
            )?,
            "line" | "arrow" | "freedraw" => {
                let pts: Vec<String> = points(element)
                    .into_iter()
                    .map(|(px, py)| format!("{},{}", fmt_num(x + px), fmt_num(y + py)))
                    .collect();
                write!(
                    out,
                    r#"<polyline points="{}" fill="none" stroke="{stroke}" stroke-width="{stroke_width}"/>"#,
                    pts.join(" ")
                )?
            }
            "text" => {
                let font_size = element.get("fontSize").and_then(Value::as_f64).unwrap_or(20.0);
                write!(
                    out,
                    r#"<text x="{}" y="{}" font-size="{}" fill="{stroke}" dominant-baseline="text-before-edge">{}</text>"#,
                    fmt_num(x),
                    fmt_num(y),
                    fmt_num(font_size),
                    html_escape::encode_text(str_or(element, "text", ""))
                )?
            }
            "image" => {
                let data_url = element
                    .get("fileId")
                    .and_then(Value::as_str)
                    .and_then(|id| files?.get(id))
                    .and_then(|file| file.get("dataURL"))
                    .and_then(Value::as_str);
                if let Some(href) = data_url {
                    write!(
                        out,
                        r#"<image x="{}" y="{}" width="{}" height="{}" href="{}"/>"#,
                        fmt_num(x),
                        fmt_num(y),
                        fmt_num(ew),
                        fmt_num(eh),
                        attr(href)
                    )?
                }
            }
            other => trace!(kind = other, "Skipping element without SVG shape"),
        }
    }

    out.push_str("</svg>");
    Ok(())
}

/// The background colour of `app_state` as export options expect it.
pub fn background_color(app_state: &AppState) -> Option<String> {
    app_state
        .get(VIEW_BACKGROUND_COLOR)
        .and_then(Value::as_str)
        .map(str::to_string)
}
