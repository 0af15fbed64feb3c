use derive_new::new;
use std::path::PathBuf;

#[derive(Debug, Clone, Eq, PartialEq, new)]
pub struct FileSpec {
    pub path: PathBuf,
    pub content: String,
}

pub fn write_file(file_spec: FileSpec) {
    // make sure the parent directory exists
    if let Some(parent) = file_spec.path.parent() {
        std::fs::create_dir_all(parent)
            .unwrap_or_else(|e| panic!("Failed to create directory {:?}: {}", parent, e));
    }

    std::fs::write(&file_spec.path, &file_spec.content)
        .unwrap_or_else(|e| panic!("Failed to write file {:?}: {}", file_spec.path, e));
}

pub fn delete_path(path: PathBuf) {
    if path.is_dir() {
        std::fs::remove_dir_all(&path)
    } else {
        std::fs::remove_file(&path)
    }
    .unwrap_or_else(|e| panic!("Failed to delete {:?}: {}", path, e));
}
