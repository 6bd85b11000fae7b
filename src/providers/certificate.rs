use serde::Serialize;
use serde_json::json;

use crate::error::{ProvisionError, Result};
use crate::plan::{NodeId, ResourceHandle};
use crate::providers::{Dependency, Described, ResourceProvider};
use crate::resource::{Naming, Reference, ResourceDeclaration};
use crate::settings::HostedZone;

#[derive(Debug, Clone, Serialize)]
pub struct CertificateInputs {
    pub naming: Naming,
    pub domain_name: String,
    pub hosted_zone: Option<HostedZone>,
    /// Pre-issued certificate to reuse instead of requesting one.
    pub existing_arn: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CertificateHandle {
    pub arn: Reference,
    description: ResourceHandle,
}

impl Described for CertificateHandle {
    fn description(&self) -> &ResourceHandle {
        &self.description
    }
}

/// Wildcard certificate for the environment domain, DNS-validated in the
/// hosted zone.
pub struct CertificateProvider;

impl ResourceProvider for CertificateProvider {
    const NODE: NodeId = NodeId::Certificate;
    const DEPENDENCIES: &'static [Dependency] = &[];

    type Inputs = CertificateInputs;
    type Handle = CertificateHandle;

    fn build(&self, inputs: &CertificateInputs) -> Result<CertificateHandle> {
        if let Some(arn) = &inputs.existing_arn {
            let arn = Reference::literal(arn.clone());
            let description = ResourceHandle::new(Self::NODE)
                .identifier("certificateArn", &arn)
                .attribute("imported", true)
                .output("SSLCertificateArn", arn.clone());
            return Ok(CertificateHandle { arn, description });
        }

        let zone = inputs.hosted_zone.as_ref().ok_or_else(|| {
            ProvisionError::build(
                Self::NODE,
                format!(
                    "ssl is enabled for {} but no DNS zone was supplied to validate the certificate",
                    inputs.domain_name
                ),
            )
        })?;
        let zone_name = zone.zone_name.trim_end_matches('.');
        let covered = inputs.domain_name == zone_name
            || inputs.domain_name.ends_with(&format!(".{zone_name}"));
        if !covered {
            return Err(ProvisionError::build(
                Self::NODE,
                format!(
                    "domain {} is outside hosted zone {}",
                    inputs.domain_name, zone.zone_name
                ),
            ));
        }

        let wildcard = format!("*.{}", inputs.domain_name);
        let certificate = ResourceDeclaration::new(
            inputs.naming.logical("SiteCertificate"),
            "AWS::CertificateManager::Certificate",
        )
        .property("DomainName", wildcard.clone())
        .property("SubjectAlternativeNames", json!([inputs.domain_name]))
        .property("ValidationMethod", "DNS")
        .property(
            "DomainValidationOptions",
            json!([
                { "DomainName": wildcard, "HostedZoneId": zone.zone_id },
                { "DomainName": inputs.domain_name, "HostedZoneId": zone.zone_id }
            ]),
        );
        let arn = certificate.id_ref();

        let description = ResourceHandle::new(Self::NODE)
            .identifier("certificateArn", &arn)
            .attribute("imported", false)
            .attribute("domainName", wildcard)
            .resources([certificate])
            .output("SSLCertificateArn", arn.clone());

        Ok(CertificateHandle { arn, description })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(zone: Option<&str>, existing: Option<&str>) -> CertificateInputs {
        CertificateInputs {
            naming: Naming::new("Dev-"),
            domain_name: "app.example.com".into(),
            hosted_zone: zone.map(|name| HostedZone {
                zone_id: "Z123".into(),
                zone_name: name.into(),
            }),
            existing_arn: existing.map(String::from),
        }
    }

    #[test]
    fn missing_zone_is_a_build_error() {
        let err = CertificateProvider.build(&inputs(None, None)).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ResourceBuild {
                resource: NodeId::Certificate,
                ..
            }
        ));
    }

    #[test]
    fn requests_wildcard_certificate_in_zone() {
        let handle = CertificateProvider
            .build(&inputs(Some("example.com."), None))
            .expect("builds");
        assert_eq!(handle.description().attributes["imported"], json!(false));
        let cert = &handle.description().resources[0];
        assert_eq!(cert.properties["DomainName"], json!("*.app.example.com"));
        assert_eq!(handle.arn, Reference::to("DevSiteCertificate"));
    }

    #[test]
    fn rejects_zone_that_does_not_cover_domain() {
        assert!(CertificateProvider.build(&inputs(Some("other.org"), None)).is_err());
    }

    #[test]
    fn existing_arn_skips_the_zone_requirement() {
        let arn = "arn:aws:acm:us-west-2:123456789012:certificate/abc";
        let handle = CertificateProvider
            .build(&inputs(None, Some(arn)))
            .expect("imports");
        assert_eq!(handle.description().attributes["imported"], json!(true));
        assert!(handle.description().resources.is_empty());
        assert_eq!(handle.description().outputs[0].value, arn);
    }
}
