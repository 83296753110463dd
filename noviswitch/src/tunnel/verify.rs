use regex::Regex;
use crate::tunnel::TunnelIds;

/// The L2TP settings a switch port should report after provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedL2tpConfig {
    pub remote_ip: String,
    pub ids: TunnelIds,
}

/// Decides whether the output of `show config port portno <n>` carries the expected tunnel.
/// The human readable port config is the only way to read the tunnel back from the switch.
pub trait ConfigVerifier: Send + Sync {
    fn matches(&self, port_config: &str, expected: &ExpectedL2tpConfig) -> bool;
}

/// Checks each field of the `L2tp tunnel configuration` block
#[derive(Debug, Default, Clone, Copy)]
pub struct L2tpConfigVerifier;

const L2TP_SECTION: &str = "L2tp tunnel configuration";

impl L2tpConfigVerifier {
    fn required_matches(expected: &ExpectedL2tpConfig) -> Vec<String> {
        let ids = expected.ids;
        vec![
            format!(r"Remote ip:\s+{}\b", regex::escape(&expected.remote_ip)),
            format!(r"Local tunnel id:\s+{}\b", ids.local),
            format!(r"Remote tunnel id:\s+{}\b", ids.remote),
            format!(r"Local session id:\s+{}\b", ids.local),
            format!(r"Udp source port:\s+{}\b", ids.local_udp_port()),
            format!(r"Udp destination port:\s+{}\b", ids.remote_udp_port()),
        ]
    }
}

impl ConfigVerifier for L2tpConfigVerifier {
    fn matches(&self, port_config: &str, expected: &ExpectedL2tpConfig) -> bool {
        let Some(start) = port_config.find(L2TP_SECTION) else {
            return false;
        };
        let l2tp_config = &port_config[start..];
        Self::required_matches(expected).iter().all(|pattern| {
            match Regex::new(pattern) {
                Ok(re) => re.is_match(l2tp_config),
                Err(err) => {
                    tracing::error!("invalid l2tp verification pattern {pattern}: {err}");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) fn port_config_output(remote_ip: &str, ids: TunnelIds) -> String {
    format!(
        "Port configuration\n\
         Port number:              3\n\
         Port down:                off\n\
         L2tp tunnel configuration\n\
         Remote ip:                {remote_ip}\n\
         Local tunnel id:          {}\n\
         Remote tunnel id:         {}\n\
         Local session id:         {}\n\
         Remote session id:        {}\n\
         Udp source port:          {}\n\
         Udp destination port:     {}\n",
        ids.local, ids.remote, ids.local, ids.remote, ids.local_udp_port(), ids.remote_udp_port()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(remote_ip: &str, ids: TunnelIds) -> ExpectedL2tpConfig {
        ExpectedL2tpConfig { remote_ip: remote_ip.into(), ids }
    }

    #[test]
    fn test_matching_config() {
        let ids = TunnelIds::loopback(4, "s1-eth1", "s1-eth2");
        let output = port_config_output("10.0.0.1", ids);
        assert!(L2tpConfigVerifier.matches(&output, &expected("10.0.0.1", ids)));
    }

    #[test]
    fn test_each_field_is_checked() {
        let ids = TunnelIds::symmetric(4);
        let output = port_config_output("10.0.0.1", ids);
        let verifier = L2tpConfigVerifier;
        assert!(!verifier.matches(&output, &expected("10.0.0.2", ids)));
        assert!(!verifier.matches(&output, &expected("10.0.0.1", TunnelIds { local: 4, remote: 5 })));
        assert!(!verifier.matches(&output, &expected("10.0.0.1", TunnelIds { local: 5, remote: 4 })));
        // no partial number matches, 4 is not 40
        let output = port_config_output("10.0.0.1", TunnelIds::symmetric(40));
        assert!(!verifier.matches(&output, &expected("10.0.0.1", ids)));
        // the dots in the ip are not wildcards
        let output = port_config_output("10.0.0.1", ids);
        assert!(!verifier.matches(&output, &expected("10a0.0.1", ids)));
    }

    #[test]
    fn test_missing_l2tp_section() {
        let verifier = L2tpConfigVerifier;
        let ids = TunnelIds::symmetric(1);
        assert!(!verifier.matches("Port configuration\nPort number: 3\n", &expected("10.0.0.1", ids)));
        assert!(!verifier.matches("", &expected("10.0.0.1", ids)));
        // fields printed before the section do not count
        let output = format!(
            "Remote ip: 10.0.0.1\nLocal tunnel id: 1\n{}",
            "L2tp tunnel configuration\nRemote ip: 10.0.0.9\n"
        );
        assert!(!verifier.matches(&output, &expected("10.0.0.1", ids)));
    }
}
