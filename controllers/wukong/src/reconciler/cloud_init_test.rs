//! Unit tests for cloud-init rendering

#[cfg(test)]
mod tests {
    use crate::reconciler::cloud_init::*;
    use crate::test_utils::*;
    use cluster_client::MockClusterClient;
    use crds::{CloudInitUser, IpConfig, IpMode, NetworkStatus};
    use serde_yaml::Value;
    use std::collections::BTreeMap;

    fn parse(document: &str) -> Value {
        let body = document.strip_prefix("#cloud-config\n").unwrap();
        serde_yaml::from_str(body).unwrap()
    }

    fn user(name: &str) -> CloudInitUser {
        CloudInitUser {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn attached(name: &str, mac: Option<&str>) -> NetworkStatus {
        NetworkStatus {
            name: name.to_string(),
            nad_name: Some(format!("vm1-{name}-nad")),
            mac_address: mac.map(str::to_string),
            ..Default::default()
        }
    }

    fn static_ip(address: &str, gateway: &str) -> IpConfig {
        IpConfig {
            mode: IpMode::Static,
            address: Some(address.to_string()),
            gateway: Some(gateway.to_string()),
            dns_servers: vec!["10.0.0.53".to_string()],
        }
    }

    #[test]
    fn test_empty_document_is_header_only() {
        let spec = create_test_wukong("vm1", "default").spec;
        assert_eq!(render_cloud_config(&spec, Vec::new(), &[], true).unwrap(), "#cloud-config\n");
    }

    #[test]
    fn test_user_defaults() {
        let mut spec = create_test_wukong("vm1", "default").spec;
        spec.cloud_init_user = Some(user("ops"));

        let doc = parse(&render_cloud_config(&spec, Vec::new(), &[], true).unwrap());
        let ops = &doc["users"][0];
        assert_eq!(ops["name"], Value::from("ops"));
        assert_eq!(ops["sudo"], Value::from("ALL=(ALL) NOPASSWD:ALL"));
        assert_eq!(ops["shell"], Value::from("/bin/bash"));
        assert!(ops["groups"].as_str().unwrap().starts_with("sudo, adm"));
        assert_eq!(ops["lock_passwd"], Value::from(false));
        assert!(ops.get("passwd").is_none());
        assert_eq!(doc["ssh_pwauth"], Value::from(true));
        assert_eq!(doc["disable_root"], Value::from(false));
    }

    #[test]
    fn test_password_hash_preferred_over_plaintext() {
        let mut spec = create_test_wukong("vm1", "default").spec;
        spec.cloud_init_user = Some(CloudInitUser {
            password: Some("hunter2".to_string()),
            password_hash: Some("$6$salt$hash".to_string()),
            groups: vec!["wheel".to_string(), "docker".to_string()],
            ..user("ops")
        });

        let doc = parse(&render_cloud_config(&spec, Vec::new(), &[], true).unwrap());
        assert_eq!(doc["users"][0]["passwd"], Value::from("$6$salt$hash"));
        assert_eq!(doc["users"][0]["groups"], Value::from("wheel, docker"));
    }

    #[test]
    fn test_ssh_keys_rendered() {
        let spec = create_test_wukong("vm1", "default").spec;
        let keys = vec!["ssh-ed25519 AAAA ops@laptop".to_string()];
        let doc = parse(&render_cloud_config(&spec, keys, &[], true).unwrap());
        assert_eq!(doc["ssh_authorized_keys"][0], Value::from("ssh-ed25519 AAAA ops@laptop"));
        assert!(doc.get("users").is_none());
    }

    #[test]
    fn test_static_network_matched_by_mac() {
        let mut spec = create_test_wukong("vm1", "default").spec;
        let mut net = create_test_bridge_network("data");
        net.ip_config = Some(static_ip("10.0.0.20/24", "10.0.0.1"));
        spec.networks.push(net);
        let resolved = vec![attached("data", Some("02:00:00:00:00:01"))];

        let doc = parse(&render_cloud_config(&spec, Vec::new(), &resolved, true).unwrap());
        let data = &doc["network"]["ethernets"]["data"];
        assert_eq!(doc["network"]["version"], Value::from(2));
        assert_eq!(data["match"]["macaddress"], Value::from("02:00:00:00:00:01"));
        assert_eq!(data["dhcp4"], Value::from(false));
        assert_eq!(data["addresses"][0], Value::from("10.0.0.20/24"));
        assert_eq!(data["gateway4"], Value::from("10.0.0.1"));
        assert_eq!(data["nameservers"]["addresses"][0], Value::from("10.0.0.53"));
    }

    #[test]
    fn test_positional_names_before_mac_is_known() {
        let mut spec = create_test_wukong("vm1", "default").spec;
        let mut storage = create_test_bridge_network("storage");
        storage.ip_config = Some(IpConfig::default());
        let mut data = create_test_bridge_network("data");
        data.ip_config = Some(static_ip("10.0.0.20/24", "10.0.0.1"));
        spec.networks.push(storage);
        spec.networks.push(data);
        let resolved = vec![attached("storage", None), attached("data", None)];

        let doc = parse(&render_cloud_config(&spec, Vec::new(), &resolved, true).unwrap());
        assert_eq!(doc["network"]["ethernets"]["eth1"]["dhcp4"], Value::from(true));
        assert_eq!(doc["network"]["ethernets"]["eth2"]["addresses"][0], Value::from("10.0.0.20/24"));

        // Without the pod interface the first attachment is eth0
        let doc = parse(&render_cloud_config(&spec, Vec::new(), &resolved, false).unwrap());
        assert!(doc["network"]["ethernets"].get("eth0").is_some());
    }

    #[test]
    fn test_unattached_networks_are_not_configured() {
        let mut spec = create_test_wukong("vm1", "default").spec;
        let mut net = create_test_bridge_network("data");
        net.ip_config = Some(static_ip("10.0.0.20/24", "10.0.0.1"));
        spec.networks.push(net);
        let resolved = vec![NetworkStatus {
            name: "data".to_string(),
            ..Default::default()
        }];

        assert_eq!(render_cloud_config(&spec, Vec::new(), &resolved, true).unwrap(), "#cloud-config\n");
    }

    #[test]
    fn test_extract_ssh_keys_prefers_conventional_names() {
        let mut data = BTreeMap::new();
        data.insert("zz-other".to_string(), b"ssh-rsa OTHER".to_vec());
        data.insert(
            "authorized_keys".to_string(),
            b"# team keys\nssh-ed25519 AAAA one\n\n  ssh-ed25519 BBBB two  \n".to_vec(),
        );
        assert_eq!(
            extract_ssh_keys(&data),
            vec!["ssh-ed25519 AAAA one".to_string(), "ssh-ed25519 BBBB two".to_string()]
        );

        data.remove("authorized_keys");
        assert_eq!(extract_ssh_keys(&data), vec!["ssh-rsa OTHER".to_string()]);
        assert!(extract_ssh_keys(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_wants_cloud_init() {
        let mut spec = create_test_wukong("vm1", "default").spec;
        assert!(!wants_cloud_init(&spec));
        spec.ssh_key_secret = Some("keys".to_string());
        assert!(wants_cloud_init(&spec));
    }

    #[tokio::test]
    async fn test_build_reads_keys_from_secret() {
        let mock = MockClusterClient::new();
        let mut data = BTreeMap::new();
        data.insert("ssh-publickey".to_string(), b"ssh-ed25519 AAAA ops".to_vec());
        mock.add_secret("default", "vm1-keys", data);
        let reconciler = create_test_reconciler(mock);
        let mut wukong = create_test_wukong("vm1", "default");
        wukong.spec.ssh_key_secret = Some("vm1-keys".to_string());

        let document = reconciler.build_cloud_init(&wukong, &[], true).await.unwrap().unwrap();
        assert_eq!(parse(&document)["ssh_authorized_keys"][0], Value::from("ssh-ed25519 AAAA ops"));
    }

    #[tokio::test]
    async fn test_build_tolerates_missing_secret() {
        let reconciler = create_test_reconciler(MockClusterClient::new());
        let mut wukong = create_test_wukong("vm1", "default");
        wukong.spec.ssh_key_secret = Some("absent".to_string());

        let document = reconciler.build_cloud_init(&wukong, &[], true).await.unwrap();
        assert_eq!(document.as_deref(), Some("#cloud-config\n"));
    }
}
