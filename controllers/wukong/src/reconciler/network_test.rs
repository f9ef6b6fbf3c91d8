//! Unit tests for the network synthesizer

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::network::{build_bridge_policy, build_network_attachment};
    use crate::test_utils::*;
    use cluster_client::models::nmstate::{DesiredState, InterfaceKind, Ipv4, Ipv4Address};
    use cluster_client::{
        Ipam, MockClusterClient, NodeInterfaceIpv4, NodeNetworkPolicy, ObjectKey, PolicyOwner, Route, kinds,
    };
    use crds::{IpConfig, IpMode, NetworkConfig, NetworkStatus, NetworkType};

    fn with_crds(multus: bool, nmstate: bool) -> MockClusterClient {
        let mock = MockClusterClient::new();
        if multus {
            mock.install_crd(kinds::MULTUS_CRD);
        }
        if nmstate {
            mock.install_crd(kinds::NMSTATE_CRD);
        }
        mock
    }

    #[tokio::test]
    async fn test_default_network_has_no_attachment() {
        let mock = with_crds(true, true);
        let reconciler = create_test_reconciler(mock.clone());
        let wukong = create_test_wukong_with_finalizer("vm1", "default");

        let networks = reconciler.synthesize_networks(&wukong, &[]).await.unwrap();
        assert_eq!(
            networks,
            vec![NetworkStatus {
                name: "default".to_string(),
                ..Default::default()
            }]
        );
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bridge_policy_declared_before_attachment() {
        let mock = with_crds(true, true);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(create_test_bridge_network("data"));

        let networks = reconciler.synthesize_networks(&wukong, &[]).await.unwrap();
        assert_eq!(networks[1].nad_name.as_deref(), Some("vm1-data-nad"));
        assert_eq!(
            mock.calls(),
            vec![
                "create_node_network_policy vm1-data-bridge".to_string(),
                "create_network_attachment vm1-data-nad".to_string(),
            ]
        );

        let attachment = mock.attachment("default", "vm1-data-nad").unwrap();
        assert_eq!(attachment.config.bridge, "br-data");
        assert_eq!(attachment.key.owner.unwrap().uid, "uid-vm1");

        // Second pass observes both and changes nothing
        mock.clear_calls();
        reconciler.synthesize_networks(&wukong, &networks).await.unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_multus_degrades_to_pod_network() {
        let mock = with_crds(false, false);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(create_test_bridge_network("data"));

        let networks = reconciler.synthesize_networks(&wukong, &[]).await.unwrap();
        assert_eq!(networks[1].name, "data");
        assert_eq!(networks[1].nad_name, None);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_attachment_is_used_as_is() {
        let mock = with_crds(true, false);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        let mut net = create_test_bridge_network("data");
        net.nad_name = Some("shared-data".to_string());
        wukong.spec.networks.push(net);

        let networks = reconciler.synthesize_networks(&wukong, &[]).await.unwrap();
        assert_eq!(networks[1].nad_name.as_deref(), Some("shared-data"));
        assert_eq!(mock.call_count("create_network_attachment"), 0);
    }

    #[tokio::test]
    async fn test_unsupported_type_is_skipped() {
        let mock = with_crds(true, true);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(NetworkConfig {
            name: "fast".to_string(),
            network_type: Some(NetworkType::Sriov),
            ..Default::default()
        });

        let networks = reconciler.synthesize_networks(&wukong, &[]).await.unwrap();
        assert_eq!(networks[1].nad_name, None);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bridge_without_physical_interface_fails() {
        let mock = with_crds(true, true);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        let mut net = create_test_bridge_network("data");
        net.physical_interface = None;
        wukong.spec.networks.push(net);

        let result = reconciler.synthesize_networks(&wukong, &[]).await;
        assert!(matches!(result, Err(ControllerError::Synthesis(_))));
        assert_eq!(mock.call_count("create_network_attachment"), 0);
    }

    #[tokio::test]
    async fn test_bridge_takes_over_static_node_address() {
        let mock = with_crds(true, true);
        mock.set_node_interface(
            "eth1",
            NodeInterfaceIpv4 {
                node: "node-a".to_string(),
                dhcp: false,
                addresses: vec![Ipv4Address {
                    ip: "10.0.0.5".to_string(),
                    prefix_length: 24,
                }],
            },
        );
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(create_test_bridge_network("data"));

        reconciler.synthesize_networks(&wukong, &[]).await.unwrap();
        let policy = mock.policy("vm1-data-bridge").unwrap();
        assert_eq!(policy.interfaces[0].ipv4.address[0].ip, "10.0.0.5");
        assert_eq!(policy.interfaces[0].ipv4.dhcp, Some(false));
        assert_eq!(policy.interfaces[1].ipv4, Ipv4::disabled());
    }

    #[tokio::test]
    async fn test_bridge_keeps_static_address_after_policy_applied() {
        let mock = with_crds(true, true);
        mock.set_node_interface(
            "eth1",
            NodeInterfaceIpv4 {
                node: "node-a".to_string(),
                dhcp: false,
                addresses: vec![Ipv4Address {
                    ip: "10.0.0.5".to_string(),
                    prefix_length: 24,
                }],
            },
        );
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(create_test_bridge_network("data"));
        let networks = reconciler.synthesize_networks(&wukong, &[]).await.unwrap();

        // NMState moved the address to the bridge, the port reports none
        mock.set_node_interface(
            "eth1",
            NodeInterfaceIpv4 {
                node: "node-a".to_string(),
                dhcp: false,
                addresses: Vec::new(),
            },
        );
        mock.clear_calls();
        reconciler.synthesize_networks(&wukong, &networks).await.unwrap();

        assert_eq!(mock.call_count("update_node_network_policy"), 0);
        let bridge = mock.policy("vm1-data-bridge").unwrap().interfaces[0].ipv4.clone();
        assert_eq!(
            bridge,
            Ipv4::fixed(vec![Ipv4Address {
                ip: "10.0.0.5".to_string(),
                prefix_length: 24,
            }])
        );
    }

    #[tokio::test]
    async fn test_policy_of_same_named_instance_elsewhere_is_not_taken_over() {
        let mock = with_crds(true, true);
        mock.add_node_network_policy(NodeNetworkPolicy {
            name: "vm1-data-bridge".to_string(),
            owner: Some(PolicyOwner::new("team-b", "vm1")),
            desired_state: DesiredState::default(),
        });
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(create_test_bridge_network("data"));

        let result = reconciler.synthesize_networks(&wukong, &[]).await;
        assert!(matches!(result, Err(ControllerError::Synthesis(msg)) if msg.contains("team-b/vm1")));
        assert_eq!(mock.call_count("update_node_network_policy"), 0);
        assert_eq!(mock.policy_owner("vm1-data-bridge"), Some(PolicyOwner::new("team-b", "vm1")));
    }

    #[tokio::test]
    async fn test_changed_node_address_updates_policy() {
        let mock = with_crds(true, true);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(create_test_bridge_network("data"));
        reconciler.synthesize_networks(&wukong, &[]).await.unwrap();

        wukong.spec.networks[1].node_address = Some("192.168.50.10/24".to_string());
        reconciler.synthesize_networks(&wukong, &[]).await.unwrap();
        assert_eq!(mock.call_count("update_node_network_policy"), 1);
        let policy = mock.policy("vm1-data-bridge").unwrap();
        assert_eq!(policy.interfaces[0].ipv4.address[0].prefix_length, 24);
    }

    #[tokio::test]
    async fn test_guest_facts_carried_over() {
        let mock = with_crds(true, true);
        let reconciler = create_test_reconciler(mock.clone());
        let mut wukong = create_test_wukong_with_finalizer("vm1", "default");
        wukong.spec.networks.push(create_test_bridge_network("data"));
        let previous = vec![NetworkStatus {
            name: "data".to_string(),
            nad_name: Some("vm1-data-nad".to_string()),
            interface_name: Some("enp2s0".to_string()),
            mac_address: Some("02:00:00:00:00:01".to_string()),
            ip_address: Some("10.0.0.20".to_string()),
        }];

        let networks = reconciler.synthesize_networks(&wukong, &previous).await.unwrap();
        assert_eq!(networks[1], previous[0]);
    }

    #[test]
    fn test_bridge_policy_shape() {
        let net = create_test_bridge_network("data");
        let policy = build_bridge_policy("default", "vm1", &net, Ipv4::dhcp()).unwrap();
        assert_eq!(policy.name, "vm1-data-bridge");
        assert_eq!(policy.owner, Some(PolicyOwner::new("default", "vm1")));
        let [bridge, port] = policy.desired_state.interfaces.as_slice() else {
            panic!("expected bridge and port");
        };
        assert_eq!(bridge.name, "br-data");
        assert_eq!(bridge.kind, InterfaceKind::LinuxBridge);
        assert_eq!(bridge.bridge.as_ref().unwrap().port[0].name, "eth1");
        assert!(!bridge.bridge.as_ref().unwrap().options.stp.enabled);
        assert_eq!(port.name, "eth1");
        assert_eq!(port.kind, InterfaceKind::Ethernet);
        assert!(!port.ipv4.enabled);
    }

    #[test]
    fn test_static_attachment_ipam() {
        let mut net = create_test_bridge_network("data");
        net.vlan_id = Some(120);
        net.bridge_name = Some("br-vms".to_string());
        net.ip_config = Some(IpConfig {
            mode: IpMode::Static,
            address: Some("10.20.0.15/24".to_string()),
            gateway: Some("10.20.0.1".to_string()),
            dns_servers: Vec::new(),
        });

        let attachment = build_network_attachment(ObjectKey::new("default", "vm1-data-nad"), &net).unwrap();
        assert_eq!(attachment.config.bridge, "br-vms");
        assert_eq!(attachment.config.vlan, Some(120));
        assert_eq!(
            attachment.config.ipam,
            Some(Ipam::HostLocal {
                subnet: "10.20.0.0/24".to_string(),
                range_start: "10.20.0.15".to_string(),
                range_end: "10.20.0.15".to_string(),
                routes: vec![Route {
                    dst: "0.0.0.0/0".to_string(),
                    gw: Some("10.20.0.1".to_string()),
                }],
            })
        );
    }

    #[test]
    fn test_dhcp_attachment_ipam() {
        let mut net = create_test_bridge_network("data");
        net.ip_config = Some(IpConfig {
            mode: IpMode::Dhcp,
            ..Default::default()
        });
        let attachment = build_network_attachment(ObjectKey::new("default", "vm1-data-nad"), &net).unwrap();
        assert_eq!(attachment.config.ipam, Some(Ipam::Dhcp {}));
    }
}
