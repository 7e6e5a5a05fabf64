//! Image-dump manifest parser.
//!
//! `apitrace dump-images -m` reports every file it writes on a line of the
//! form `Wrote <dir>/<callID>-<type>.<ext>`. The type tells which attachment
//! the image came from: `mrt<N>` for a color target, `z` for depth and `s`
//! for stencil.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Images written for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSet {
    pub call_id: String,
    pub depth: Option<String>,
    pub stencil: Option<String>,
    /// Color attachments in the order they were written.
    pub mrt: Vec<String>,
    /// File extension shared by every image.
    #[serde(rename = "type")]
    pub image_type: Option<String>,
}

impl ImageSet {
    /// Record one written file name (`<callID>-<type>.<ext>`).
    ///
    /// The call id and extension are taken from every well-shaped name, even
    /// when its type is not recognised. Returns `false` when the name does not
    /// have that shape or the type is not recognised.
    pub fn record(&mut self, file_name: &str) -> bool {
        let parts = file_name
            .rsplit_once('-')
            .and_then(|(call_id, rest)| Some((call_id, rest.split_once('.')?)))
            .filter(|(call_id, (kind, _))| !call_id.is_empty() && !kind.is_empty());
        let Some((call_id, (kind, ext))) = parts else {
            warn!(file_name, "image file name is not <call>-<type>.<ext>");
            return false;
        };

        self.call_id = call_id.to_string();
        self.image_type = Some(ext.to_string());

        if kind.contains("mrt") {
            if !self.mrt.iter().any(|m| m == kind) {
                self.mrt.push(kind.to_string());
            }
        } else if kind.contains('z') {
            self.depth = Some(kind.to_string());
        } else if kind.contains('s') {
            self.stencil = Some(kind.to_string());
        } else {
            warn!(file_name, kind, "unrecognised image type");
            return false;
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.mrt.is_empty() && self.depth.is_none() && self.stencil.is_none()
    }

    /// File names of every image in the set, color targets first.
    pub fn file_names(&self) -> Vec<String> {
        let ext = self.image_type.as_deref().unwrap_or("png");
        self.mrt
            .iter()
            .chain(self.depth.iter())
            .chain(self.stencil.iter())
            .map(|kind| format!("{}-{kind}.{ext}", self.call_id))
            .collect()
    }
}

/// Parse the stdout of an image-dump run.
pub fn parse_image_manifest(text: &str) -> ImageSet {
    let mut set = ImageSet::default();
    for line in text.lines() {
        let Some(path) = line.trim().strip_prefix("Wrote ") else {
            continue;
        };
        let path = path.trim();
        let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        set.record(file_name);
    }
    set
}
