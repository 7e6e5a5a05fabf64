//! Retrace state decoder.
//!
//! `glretrace --dump-format=json` prints the GL state at the requested call
//! as one JSON document. The interesting parts are kept as [`AttrValue`]
//! trees; framebuffer attachments get a typed descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A JSON-shaped value with a closed set of variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Look up a key when the value is a map.
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }
}

pub type AttrMap = BTreeMap<String, AttrValue>;

/// One framebuffer attachment as dumped by the retracer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameBuffer {
    #[serde(rename = "__class__", default)]
    pub class: String,
    #[serde(rename = "__width__", default)]
    pub width: u32,
    #[serde(rename = "__height__", default)]
    pub height: u32,
    #[serde(rename = "__depth__", default)]
    pub depth: u32,
    #[serde(rename = "__format__", default)]
    pub format: String,
    /// Encoded pixel payload (base64 image data).
    #[serde(rename = "__data__", default)]
    pub data: String,
}

/// GL state captured at one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetraceData {
    pub parameters: AttrMap,
    pub shaders: AttrMap,
    pub uniforms: AttrMap,
    pub buffers: AttrMap,
    #[serde(rename = "shaderstoragebufferblocks")]
    pub shader_storage_buffer_blocks: AttrMap,
    pub textures: AttrMap,
    pub framebuffer: BTreeMap<String, FrameBuffer>,
}

impl RetraceData {
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
            && self.shaders.is_empty()
            && self.uniforms.is_empty()
            && self.buffers.is_empty()
            && self.shader_storage_buffer_blocks.is_empty()
            && self.textures.is_empty()
            && self.framebuffer.is_empty()
    }
}

/// The retracer output was not a state document.
#[derive(Debug, thiserror::Error)]
#[error("retrace output is not a state document: {0}")]
pub struct DecodeFailure(#[from] serde_json::Error);

/// Decode retracer output, reporting why it failed.
pub fn try_decode_retrace(text: &str) -> Result<RetraceData, DecodeFailure> {
    Ok(serde_json::from_str(text.trim())?)
}

/// Decode retracer output; anything undecodable yields empty data.
pub fn decode_retrace(text: &str) -> RetraceData {
    try_decode_retrace(text).unwrap_or_else(|e| {
        warn!(error = %e, bytes = text.len(), "could not decode retrace output");
        RetraceData::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/retrace/{name}"))
            .unwrap_or_else(|e| panic!("fixture {name}: {e}"))
    }

    #[test]
    fn decodes_state_document() {
        let data = try_decode_retrace(&fixture("state.json")).expect("decode");

        assert_eq!(
            data.parameters.get("GL_VIEWPORT"),
            Some(&AttrValue::List(vec![
                AttrValue::Number(0.into()),
                AttrValue::Number(0.into()),
                AttrValue::Number(640.into()),
                AttrValue::Number(480.into()),
            ]))
        );
        assert_eq!(
            data.parameters.get("GL_BLEND"),
            Some(&AttrValue::Bool(false))
        );
        assert_eq!(
            data.parameters.get("GL_ARRAY_BUFFER_BINDING"),
            Some(&AttrValue::Null)
        );
        assert_eq!(
            data.shaders
                .get("GL_VERTEX_SHADER")
                .and_then(AttrValue::as_str)
                .map(|s| s.starts_with("#version")),
            Some(true)
        );
        assert_eq!(
            data.uniforms
                .get("color")
                .and_then(|u| u.get("value"))
                .map(|v| matches!(v, AttrValue::List(items) if items.len() == 4)),
            Some(true)
        );

        let color = &data.framebuffer["GL_BACK"];
        assert_eq!(color.class, "image");
        assert_eq!((color.width, color.height, color.depth), (640, 480, 1));
        assert_eq!(color.format, "RGBA");
        assert!(!color.data.is_empty());
        assert!(data.textures.is_empty());
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let data = try_decode_retrace(r#"{"parameters": {"GL_DEPTH_TEST": true}}"#)
            .expect("decode");
        assert_eq!(data.parameters.len(), 1);
        assert!(data.framebuffer.is_empty());
        assert!(!data.is_empty());
    }

    #[test]
    fn garbage_yields_empty_data() {
        let text = "glretrace: error: failed to open trace.trace\n";
        assert!(try_decode_retrace(text).is_err());
        assert!(decode_retrace(text).is_empty());
    }
}
