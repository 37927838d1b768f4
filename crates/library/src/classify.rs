//! File classification by extension: library category folders, the security
//! filter applied to untrusted trees, and thumbnail pairing.

use meshvault_storage::dotted_extension;
use std::path::{Path, PathBuf};

/// Folder for extensions without a dedicated category.
pub const OTHER_FOLDER: &str = "Other_Files";
/// Folder gathering extra files when the policy says so.
pub const MISC_FOLDER: &str = "Misc";

const CATEGORIES: &[(&str, &str)] = &[
    (".stl", "STL_Files"),
    (".obj", "OBJ_Files"),
    (".3mf", "3MF_Files"),
    (".step", "STEP_Files"),
    (".stp", "STEP_Files"),
    (".ply", "PLY_Files"),
    (".fbx", "FBX_Files"),
    (".dae", "DAE_Files"),
    (".gcode", "GCODE_Files"),
];

const GCODE: &[&str] = &[".gcode", ".gco", ".bgcode"];

const IMAGES: &[&str] = &[".png", ".jpg", ".jpeg", ".webp", ".bmp", ".gif"];

/// Executables, installers, scripts and shortcuts.
const DANGEROUS: &[&str] = &[
    ".exe", ".dll", ".com", ".scr", ".msi", ".msp", ".pif", ".cpl", ".sys", ".drv", ".bat", ".cmd", ".ps1", ".psm1",
    ".vbs", ".vbe", ".js", ".jse", ".wsf", ".wsh", ".hta", ".lnk", ".reg", ".sh", ".bash", ".zsh", ".csh", ".app",
    ".dmg", ".pkg", ".deb", ".rpm", ".apk", ".jar", ".so", ".dylib",
];

const SYSTEM_FILES: &[&str] = &["thumbs.db", "desktop.ini", ".ds_store", "ehthumbs.db"];

/// Broad kind of a file, for planning purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    Model,
    Gcode,
    Image,
    Other,
}
impl FileClass {
    pub fn of(path: impl AsRef<Path>) -> Self {
        let ext = dotted_extension(path);
        if GCODE.contains(&ext.as_str()) {
            Self::Gcode
        } else if CATEGORIES.iter().any(|(e, _)| *e == ext) {
            Self::Model
        } else if IMAGES.contains(&ext.as_str()) {
            Self::Image
        } else {
            Self::Other
        }
    }

    /// Models and G-code are organized into category folders.
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Model | Self::Gcode)
    }
}

/// Library category folder for a file, chosen by extension.
///
/// ```
/// use meshvault_library::classify::category_folder;
/// assert_eq!(category_folder("Benchy.STL"), "STL_Files");
/// assert_eq!(category_folder("readme.txt"), "Other_Files");
/// ```
pub fn category_folder(path: impl AsRef<Path>) -> &'static str {
    let ext = dotted_extension(path);
    if GCODE.contains(&ext.as_str()) {
        return "GCODE_Files";
    }
    CATEGORIES.iter().find(|(e, _)| *e == ext).map(|(_, folder)| *folder).unwrap_or(OTHER_FOLDER)
}

/// Whether a file may be picked up from an untrusted tree.
///
/// Rejects executable and script types, OS metadata files and hidden files.
pub fn is_safe(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    if SYSTEM_FILES.contains(&name.to_ascii_lowercase().as_str()) {
        return false;
    }
    !DANGEROUS.contains(&dotted_extension(path).as_str())
}

/// Whether an image named `image_stem` is the thumbnail of a model named
/// `model_stem`. Matching is case-insensitive.
pub fn is_thumbnail_of(image_stem: &str, model_stem: &str) -> bool {
    let image = image_stem.to_lowercase();
    let model = model_stem.to_lowercase();
    image == model
        || image == format!("{model}_thumb")
        || image == format!("{model}-thumb")
        || image == format!("thumb_{model}")
}

/// Looks beside `model` for an image that pairs with it.
///
/// Only images that actually decode are returned, so a corrupt sidecar falls
/// back to rendering.
pub fn find_paired_image(model: &Path) -> Option<PathBuf> {
    let stem = model.file_stem()?.to_str()?;
    let dir = model.parent()?;
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && FileClass::of(p) == FileClass::Image)
        .filter(|p| p.file_stem().and_then(|s| s.to_str()).is_some_and(|s| is_thumbnail_of(s, stem)))
        .collect();
    candidates.sort();
    candidates.into_iter().find(|p| meshvault_thumbnail::is_valid_image(p))
}
