use kube::CustomResourceExt;

use spot::{Build, Workspace};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Workspace::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&Build::crd())?);
    Ok(())
}
