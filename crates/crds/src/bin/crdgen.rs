//! Prints the CustomResourceDefinitions as a multi-document YAML stream.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > config/crd/novasphere.yaml
//! ```

use crds::{Wukong, WukongSnapshot};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [Wukong::crd(), WukongSnapshot::crd()];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
