//! Resolved job templates and their lowering to a launch description.

use serde::{Deserialize, Serialize};
use xnat_jupyter_store::{
    BindMount, ComputeEnvironment, Constraint, ContainerSpec, Hardware, MountKind, Placement,
    Resources, TaskTemplate,
};

/// An environment, a hardware profile and the constraints that apply.
///
/// Produced fresh by a resolver for each call and never persisted. Constraints
/// are kept in resolution order without de-duplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    /// The environment payload.
    pub compute_environment: ComputeEnvironment,
    /// The hardware payload.
    pub hardware: Hardware,
    /// Constraints from every available constraint config.
    pub constraints: Vec<Constraint>,
}

impl JobTemplate {
    /// Lower into the container/resources/placement shape the Hub spawner takes.
    ///
    /// Hardware environment variables override environment variables with the
    /// same name. Hardware constraints come before the job's constraints.
    #[must_use]
    pub fn to_task_template(&self) -> TaskTemplate {
        let env = &self.compute_environment;
        let hw = &self.hardware;

        let environment = env
            .environment_variables
            .iter()
            .chain(&hw.environment_variables)
            .map(|var| (var.key.clone(), var.value.clone()))
            .collect();

        let mounts = env
            .mounts
            .iter()
            .map(|mount| {
                let is_volume = !mount.volume_name.trim().is_empty();
                BindMount {
                    name: if is_volume {
                        mount.volume_name.clone()
                    } else {
                        mount.container_path.clone()
                    },
                    writable: !mount.read_only,
                    container_host_path: if is_volume {
                        mount.volume_name.clone()
                    } else {
                        mount.local_path.clone()
                    },
                    xnat_host_path: mount.local_path.clone(),
                    jupyter_host_path: mount.container_path.clone(),
                    kind: if is_volume {
                        MountKind::Volume
                    } else {
                        MountKind::Bind
                    },
                }
            })
            .collect();

        let constraints = hw
            .constraints
            .iter()
            .chain(&self.constraints)
            .flat_map(Constraint::to_list)
            .collect();

        TaskTemplate {
            container_spec: ContainerSpec {
                image: env.image.clone(),
                command: env.command.clone(),
                env: environment,
                labels: std::collections::BTreeMap::new(),
                mounts,
            },
            resources: Resources {
                cpu_limit: hw.cpu_limit,
                cpu_reservation: hw.cpu_reservation,
                mem_limit: hw.memory_limit.clone(),
                mem_reservation: hw.memory_reservation.clone(),
                generic_resources: hw
                    .generic_resources
                    .iter()
                    .map(|r| (r.name.clone(), r.value.clone()))
                    .collect(),
            },
            placement: Placement { constraints },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xnat_jupyter_store::{ConstraintOperator, EnvironmentVariable, GenericResource, Mount};

    fn constraint(key: &str, value: &str, operator: ConstraintOperator) -> Constraint {
        Constraint {
            key: key.to_string(),
            values: [value.to_string()].into(),
            operator,
        }
    }

    fn template() -> JobTemplate {
        JobTemplate {
            compute_environment: ComputeEnvironment {
                name: "scipy".into(),
                image: "jupyter/scipy-notebook:hub-3.0.0".into(),
                command: String::new(),
                environment_variables: vec![
                    EnvironmentVariable::new("MODE", "cpu"),
                    EnvironmentVariable::new("LANG", "C.UTF-8"),
                ],
                mounts: vec![
                    Mount {
                        volume_name: "shared-data".into(),
                        container_path: "/shared".into(),
                        read_only: true,
                        ..Mount::default()
                    },
                    Mount {
                        local_path: "/data/xnat/tools".into(),
                        container_path: "/tools".into(),
                        ..Mount::default()
                    },
                ],
            },
            hardware: Hardware {
                name: "gpu".into(),
                cpu_limit: Some(4.0),
                memory_limit: Some("16G".into()),
                constraints: vec![constraint("node.role", "worker", ConstraintOperator::In)],
                environment_variables: vec![EnvironmentVariable::new("MODE", "gpu")],
                generic_resources: vec![GenericResource {
                    name: "nvidia.com/gpu".into(),
                    value: "1".into(),
                }],
                ..Hardware::default()
            },
            constraints: vec![constraint("node.labels.site", "b", ConstraintOperator::NotIn)],
        }
    }

    #[test]
    fn hardware_variables_override_environment() {
        let task = template().to_task_template();
        assert_eq!(task.container_spec.env["MODE"], "gpu");
        assert_eq!(task.container_spec.env["LANG"], "C.UTF-8");
    }

    #[test]
    fn mounts_become_volume_or_bind() {
        let task = template().to_task_template();
        let mounts = &task.container_spec.mounts;

        assert_eq!(mounts[0].kind, MountKind::Volume);
        assert_eq!(mounts[0].container_host_path, "shared-data");
        assert!(!mounts[0].writable);

        assert_eq!(mounts[1].kind, MountKind::Bind);
        assert_eq!(mounts[1].container_host_path, "/data/xnat/tools");
        assert_eq!(mounts[1].jupyter_host_path, "/tools");
        assert!(mounts[1].writable);
    }

    #[test]
    fn hardware_constraints_precede_job_constraints() {
        let task = template().to_task_template();
        assert_eq!(
            task.placement.constraints,
            vec!["node.role==worker", "node.labels.site!=b"]
        );
    }

    #[test]
    fn resources_copied_from_hardware() {
        let task = template().to_task_template();
        assert_eq!(task.resources.cpu_limit, Some(4.0));
        assert_eq!(task.resources.mem_limit.as_deref(), Some("16G"));
        assert_eq!(task.resources.generic_resources["nvidia.com/gpu"], "1");
    }
}
