use crate::support::{fail, load_config_or_exit, print_json_or_exit};
use serde_json::json;
use std::fs;
use std::path::Path;

pub fn run(path: String, force: bool, config: Option<String>, json_output: bool) {
    let config = load_config_or_exit(config.as_deref());
    if let Err(e) = config.validate() {
        fail(e);
    }
    let rendered = config.to_toml_string().unwrap_or_else(|e| fail(e));

    let target = Path::new(&path);
    if target.exists() && !force {
        fail(format!("{path} already exists (pass --force to replace it)"));
    }
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .unwrap_or_else(|e| fail(format!("failed to create {}: {e}", parent.display())));
    }
    fs::write(target, &rendered).unwrap_or_else(|e| fail(format!("failed to write {path}: {e}")));

    if json_output {
        print_json_or_exit(&json!({ "path": path, "bytes": rendered.len() }), "init-config");
    } else {
        println!("folio init-config {path}");
        println!("  wrote {} bytes", rendered.len());
    }
}
