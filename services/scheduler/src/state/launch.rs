//! Translating a reserved task into the LAUNCH description.

use berth_proto::{
    resource_names, AgentId, CommandInfo, CommandUri, ContainerInfo, ContainerType, DockerInfo,
    DockerPortMapping, DurationInfo, EnvVariable, Environment, HealthCheck, HealthCheckType,
    HttpCheckInfo, KillPolicy, Label, Labels, Parameter, Range, Resource, TaskId as WireTaskId,
    TaskInfo, TcpCheckInfo, Volume, VolumeMode,
};

use super::task::Task;
use super::version::{ContainerSpec, HealthCheckProtocol, HealthCheckSpec, Version};

/// Build the task description for `task`, placed on `agent_id`.
///
/// Resources are tagged with `role` unless it is the default role `*`.
pub fn build_task_info(version: &Version, task: &Task, agent_id: &AgentId, role: &str) -> TaskInfo {
    TaskInfo {
        name: task.name.clone(),
        task_id: WireTaskId::new(task.id.to_string()),
        agent_id: agent_id.clone(),
        resources: resources(task, role),
        command: Some(command(version)),
        container: version.container.as_ref().and_then(|c| container(c, task)),
        health_check: version
            .health_checks
            .first()
            .map(|check| health_check(check, task)),
        kill_policy: version.kill_policy.map(|policy| KillPolicy {
            grace_period: Some(DurationInfo::from_secs(policy.duration_secs)),
        }),
        labels: (!version.labels.is_empty()).then(|| Labels {
            labels: version
                .labels
                .iter()
                .map(|(key, value)| Label {
                    key: key.clone(),
                    value: Some(value.clone()),
                })
                .collect(),
        }),
    }
}

fn resources(task: &Task, role: &str) -> Vec<Resource> {
    let claimed = &task.resources;
    let mut resources = vec![
        Resource::scalar(resource_names::CPUS, claimed.cpus),
        Resource::scalar(resource_names::MEM, claimed.mem),
    ];
    if claimed.disk > 0.0 {
        resources.push(Resource::scalar(resource_names::DISK, claimed.disk));
    }
    if !claimed.ports.is_empty() {
        let ranges = claimed
            .ports
            .iter()
            .map(|port| Range {
                begin: *port,
                end: *port,
            })
            .collect();
        resources.push(Resource::ranges(resource_names::PORTS, ranges));
    }

    if role == "*" {
        resources
    } else {
        resources.into_iter().map(|r| r.with_role(role)).collect()
    }
}

fn command(version: &Version) -> CommandInfo {
    let environment = (!version.env.is_empty()).then(|| Environment {
        variables: version
            .env
            .iter()
            .map(|(name, value)| EnvVariable {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
    });

    CommandInfo {
        value: version.command.clone(),
        // Without a command the image entrypoint runs.
        shell: version.command.is_some(),
        uris: version
            .uris
            .iter()
            .map(|uri| CommandUri { value: uri.clone() })
            .collect(),
        environment,
        user: version.run_as.clone(),
    }
}

fn container(spec: &ContainerSpec, task: &Task) -> Option<ContainerInfo> {
    let docker = spec.docker.as_ref()?;

    let port_mappings = docker
        .port_mappings
        .iter()
        .zip(task.resources.ports.iter())
        .map(|(mapping, host_port)| DockerPortMapping {
            host_port: *host_port as u32,
            container_port: mapping.container_port,
            protocol: Some(mapping.protocol.clone()),
        })
        .collect();

    let volumes = spec
        .volumes
        .iter()
        .map(|v| Volume {
            container_path: v.container_path.clone(),
            host_path: v.host_path.clone(),
            mode: if v.mode.eq_ignore_ascii_case("ro") {
                VolumeMode::Ro
            } else {
                VolumeMode::Rw
            },
        })
        .collect();

    Some(ContainerInfo {
        container_type: ContainerType::Docker,
        docker: Some(DockerInfo {
            image: docker.image.clone(),
            network: docker.network,
            port_mappings,
            privileged: docker.privileged,
            parameters: docker
                .parameters
                .iter()
                .map(|p| Parameter {
                    key: p.key.clone(),
                    value: p.value.clone(),
                })
                .collect(),
            force_pull_image: docker.force_pull_image,
        }),
        volumes,
    })
}

fn health_check(spec: &HealthCheckSpec, task: &Task) -> HealthCheck {
    let port = task
        .resources
        .ports
        .get(spec.port_index)
        .copied()
        .unwrap_or_default() as u32;

    let (check_type, http, tcp, command) = match spec.protocol {
        HealthCheckProtocol::Http => (
            HealthCheckType::Http,
            Some(HttpCheckInfo {
                port,
                path: spec.path.clone(),
            }),
            None,
            None,
        ),
        HealthCheckProtocol::Tcp => (HealthCheckType::Tcp, None, Some(TcpCheckInfo { port }), None),
        HealthCheckProtocol::Command => (
            HealthCheckType::Command,
            None,
            None,
            Some(CommandInfo {
                value: spec.command.clone(),
                shell: true,
                ..CommandInfo::default()
            }),
        ),
    };

    HealthCheck {
        check_type,
        delay_seconds: None,
        interval_seconds: spec.interval_seconds,
        timeout_seconds: spec.timeout_seconds,
        consecutive_failures: spec.max_consecutive_failures,
        grace_period_seconds: spec.grace_period_seconds,
        command,
        http,
        tcp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::task::TaskResources;
    use crate::state::version::fixtures::{bridged, version};
    use berth_id::AppId;

    fn task_for(version: &Version, ports: Vec<u64>) -> Task {
        Task::new(
            version.app_id,
            0,
            "0.web.cluster".to_string(),
            version.id,
            TaskResources {
                cpus: version.cpus,
                mem: version.mem,
                disk: version.disk,
                ports,
            },
        )
    }

    #[test]
    fn test_command_task_info() {
        let mut v = version(AppId::new(), 0.5, 128.0, 1);
        v.env.insert("MODE".into(), "prod".into());
        let task = task_for(&v, Vec::new());

        let info = build_task_info(&v, &task, &AgentId::new("agent-1"), "*");

        assert_eq!(info.task_id.as_str(), task.id.to_string());
        assert_eq!(info.agent_id.as_str(), "agent-1");
        assert_eq!(info.resources.len(), 2);
        assert!(info.resources.iter().all(|r| r.role.is_none()));
        let command = info.command.unwrap();
        assert!(command.shell);
        assert_eq!(command.value.as_deref(), Some("sleep 1000"));
        assert_eq!(command.environment.unwrap().variables[0].name, "MODE");
        assert!(info.container.is_none());
    }

    #[test]
    fn test_bridged_task_info_maps_ports() {
        let mut v = bridged(version(AppId::new(), 1.0, 256.0, 1), &[80, 443]);
        v.command = None;
        let task = task_for(&v, vec![31000, 31001]);

        let info = build_task_info(&v, &task, &AgentId::new("agent-1"), "web");

        let ports = info
            .resources
            .iter()
            .find(|r| r.name == resource_names::PORTS)
            .and_then(|r| r.ranges.clone())
            .unwrap();
        assert_eq!(ports.range.len(), 2);
        assert!(info.resources.iter().all(|r| r.role.as_deref() == Some("web")));

        let docker = info.container.unwrap().docker.unwrap();
        assert_eq!(docker.port_mappings[0].host_port, 31000);
        assert_eq!(docker.port_mappings[1].container_port, 443);
        assert!(!info.command.unwrap().shell);
    }
}
