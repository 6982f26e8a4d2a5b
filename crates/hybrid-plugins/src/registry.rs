//! The built-in plugin table.

use hybrid_core::{AttestationStream, NodeAttestor, PluginError, PluginRegistry};

use crate::aws_iid::{self, AwsIidAttestor};
use crate::azure_msi::{self, AzureMsiAttestor};
use crate::gcp_iit::{self, GcpIitAttestor};
use crate::k8s_psat::{self, K8sPsatAttestor};

/// One of the built-in attestation plugins.
#[derive(Debug)]
pub enum Attestor {
    /// AWS instance identity document.
    AwsIid(AwsIidAttestor),
    /// Kubernetes projected service account token.
    K8sPsat(K8sPsatAttestor),
    /// Azure managed service identity.
    AzureMsi(AzureMsiAttestor),
    /// GCP instance identity token.
    GcpIit(GcpIitAttestor),
}

impl Attestor {
    /// The registry name of this plugin.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwsIid(_) => aws_iid::NAME,
            Self::K8sPsat(_) => k8s_psat::NAME,
            Self::AzureMsi(_) => azure_msi::NAME,
            Self::GcpIit(_) => gcp_iit::NAME,
        }
    }
}

impl NodeAttestor for Attestor {
    fn configure(&mut self, fragment: &str) -> Result<(), PluginError> {
        match self {
            Self::AwsIid(p) => p.configure(fragment),
            Self::K8sPsat(p) => p.configure(fragment),
            Self::AzureMsi(p) => p.configure(fragment),
            Self::GcpIit(p) => p.configure(fragment),
        }
    }

    async fn aid_attestation<S: AttestationStream>(&self, stream: &mut S) -> Result<(), PluginError> {
        match self {
            Self::AwsIid(p) => p.aid_attestation(stream).await,
            Self::K8sPsat(p) => p.aid_attestation(stream).await,
            Self::AzureMsi(p) => p.aid_attestation(stream).await,
            Self::GcpIit(p) => p.aid_attestation(stream).await,
        }
    }
}

type Constructor = fn() -> Attestor;

const BUILTINS: &[(&str, Constructor)] = &[
    (aws_iid::NAME, || Attestor::AwsIid(AwsIidAttestor::new())),
    (k8s_psat::NAME, || Attestor::K8sPsat(K8sPsatAttestor::new())),
    (azure_msi::NAME, || Attestor::AzureMsi(AzureMsiAttestor::new())),
    (gcp_iit::NAME, || Attestor::GcpIit(GcpIitAttestor::new())),
];

/// Registry of the built-in plugins.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRegistry;

impl PluginRegistry for BuiltinRegistry {
    type Plugin = Attestor;

    fn supported(&self) -> Vec<&'static str> {
        BUILTINS.iter().map(|(name, _)| *name).collect()
    }

    fn construct(&self, name: &str) -> Option<Attestor> {
        BUILTINS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, constructor)| constructor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_core::{HybridError, PluginName, instantiate};
    use test_case::test_case;

    #[test_case("aws_iid")]
    #[test_case("k8s_psat")]
    #[test_case("azure_msi")]
    #[test_case("gcp_iit")]
    fn test_every_builtin_constructs(name: &str) {
        let plugin = BuiltinRegistry.construct(name).unwrap();
        assert_eq!(plugin.name(), name);
    }

    #[test_case("AWS_IID" ; "names are case sensitive")]
    #[test_case("tpm_devid" ; "unregistered plugin")]
    #[test_case("" ; "empty name")]
    fn test_unknown_names(name: &str) {
        assert!(BuiltinRegistry.construct(name).is_none());
    }

    #[test]
    fn test_supported_lists_all() {
        assert_eq!(
            BuiltinRegistry.supported(),
            vec!["aws_iid", "k8s_psat", "azure_msi", "gcp_iit"]
        );
    }

    #[test]
    fn test_instantiate_reports_unknown() {
        let names = [PluginName::new("aws_iid"), PluginName::new("x509pop")];

        let err = instantiate(&BuiltinRegistry, &names).unwrap_err();

        assert!(matches!(err, HybridError::UnsupportedPlugin { name } if name == "x509pop"));
    }

    #[test]
    fn test_configure_dispatches_to_variant() {
        let mut plugin = BuiltinRegistry.construct("k8s_psat").unwrap();

        plugin.configure("cluster = \"prod\"\n").unwrap();

        let Attestor::K8sPsat(inner) = &plugin else {
            panic!("wrong variant");
        };
        assert_eq!(inner.config().unwrap().cluster, "prod");
    }
}
