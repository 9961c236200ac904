use std::path::Path;

use anyhow::Result;
use orgflow_engine::TemplateStore;

/// Execute the `templates` command: list templates in a directory.
pub fn execute(dir: &Path) -> Result<()> {
    let mut store = TemplateStore::new();
    let loaded = store.load_dir(dir)?;
    if loaded == 0 {
        println!("No templates found in {}", dir.display());
        return Ok(());
    }

    for template in store.iter() {
        println!("{:24} {}", template.id.as_str(), template.name);
        for name in &template.execution_order {
            if let Some(step) = template.step(name) {
                println!(
                    "    {:28} {} -> {}",
                    step.name, step.extract.object, step.load.target_object
                );
            }
        }
    }
    Ok(())
}
