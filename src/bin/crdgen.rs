//! Prints the `GatewaySync` `CustomResourceDefinition` as YAML, for
//! `kubectl apply -f` or packaging into a Helm chart's CRD directory.

use kube::CustomResourceExt;
use stoker::GatewaySync;

fn main() -> anyhow::Result<()> {
    let crd = GatewaySync::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
