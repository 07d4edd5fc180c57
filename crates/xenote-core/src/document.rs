//! Document snapshot types carried between the editor and the parent frame.
//!
//! Elements, app-state and files are opaque JSON to the bridge: their schema
//! belongs to the drawing engine and is only touched through the serializer
//! collaborators.

use serde::{Deserialize, Serialize};

/// A single drawing element (opaque).
pub type Element = serde_json::Value;

/// Editor app-state (opaque key/value map).
pub type AppState = serde_json::Map<String, serde_json::Value>;

/// Binary files referenced by elements, keyed by file id.
pub type BinaryFiles = serde_json::Map<String, serde_json::Value>;

/// App-state key holding the canvas background colour.
pub const VIEW_BACKGROUND_COLOR: &str = "viewBackgroundColor";

/// The most recently staged document snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedDocument {
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub app_state: AppState,
    #[serde(default)]
    pub files: BinaryFiles,
}

impl StagedDocument {
    pub fn new(elements: Vec<Element>, app_state: AppState, files: BinaryFiles) -> Self {
        Self {
            elements,
            app_state,
            files,
        }
    }

    pub fn view_background_color(&self) -> Option<&serde_json::Value> {
        self.app_state.get(VIEW_BACKGROUND_COLOR)
    }

    /// The only app-state that is persisted with a save.
    pub fn persisted_app_state(&self) -> PersistedAppState {
        PersistedAppState {
            view_background_color: self.view_background_color().cloned(),
        }
    }
}

/// App-state reduced to the background colour.
///
/// An absent colour serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAppState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_background_color: Option<serde_json::Value>,
}

/// Payload of a `res savedata` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveData {
    /// Sanitized elements, serialized as a JSON string.
    pub elements: String,
    /// [`PersistedAppState`], serialized as a JSON string.
    pub app_state: String,
    pub files: BinaryFiles,
    /// SVG markup of the non-deleted elements.
    pub svg: String,
}

/// Document state restored from loaded content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDataState {
    pub elements: Vec<Element>,
    /// `None` when the loaded content carried no app-state.
    pub app_state: Option<AppState>,
}

/// Progress of the load handshake with the parent frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    #[default]
    Unloaded,
    AwaitingLoad,
    Loaded,
    LoadFailed,
}
