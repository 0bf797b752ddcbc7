use anyhow::Result;
use std::path::Path;
use uuid::Uuid;

/// Stable daemon identity: a UUID persisted at `{data_dir}/daemon_id` on
/// first start and reused thereafter.
pub fn get_or_create(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("daemon_id");

    if path.exists() {
        let id = std::fs::read_to_string(&path)?.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }

    let id = Uuid::new_v4().to_string();
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, &id)?;
    Ok(id)
}
