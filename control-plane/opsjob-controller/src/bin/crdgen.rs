use kube::core::CustomResourceExt;
use opsjob_controller::crd::operation_job::OperationJob;

fn main() {
    let crd = OperationJob::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
