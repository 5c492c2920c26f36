//! Static Flux kind table and the resource path builder.
//!
//! Every supported kind has exactly one row; an unknown kind is an error,
//! never a default.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Group/version/kind plus the plural used in resource paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Gvk {
    pub kind: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
}

/// The apps/v1 Deployment a Flux controller runs as.
pub const CONTROLLER_GVK: Gvk = Gvk { kind: "Deployment", group: "apps", version: "v1", plural: "deployments" };

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown kind: {0}")]
pub struct UnknownKind(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("resource path: {0} must not be empty")]
    Empty(&'static str),
}

/// What a kind does in the Flux pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KindRole {
    /// Produces artifacts (git, OCI, helm repos/charts, buckets).
    Source,
    /// Applies artifacts from a referenced source.
    Deployment,
    Notification,
    /// Image scanning and update automation.
    Automation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FluxKind {
    GitRepository,
    OCIRepository,
    Bucket,
    HelmRepository,
    HelmChart,
    Kustomization,
    HelmRelease,
    Terraform,
    ImageRepository,
    ImagePolicy,
    ImageUpdateAutomation,
    Provider,
    Alert,
    Receiver,
}

const SOURCE: &str = "source.toolkit.fluxcd.io";
const KUSTOMIZE: &str = "kustomize.toolkit.fluxcd.io";
const HELM: &str = "helm.toolkit.fluxcd.io";
const TF: &str = "infra.contrib.fluxcd.io";
const IMAGE: &str = "image.toolkit.fluxcd.io";
const NOTIFICATION: &str = "notification.toolkit.fluxcd.io";

const fn gvk(kind: &'static str, group: &'static str, version: &'static str, plural: &'static str) -> Gvk {
    Gvk { kind, group, version, plural }
}

static KIND_TABLE: [(FluxKind, Gvk, KindRole); 14] = [
    (FluxKind::GitRepository, gvk("GitRepository", SOURCE, "v1", "gitrepositories"), KindRole::Source),
    (FluxKind::OCIRepository, gvk("OCIRepository", SOURCE, "v1beta2", "ocirepositories"), KindRole::Source),
    (FluxKind::Bucket, gvk("Bucket", SOURCE, "v1beta2", "buckets"), KindRole::Source),
    (FluxKind::HelmRepository, gvk("HelmRepository", SOURCE, "v1beta2", "helmrepositories"), KindRole::Source),
    (FluxKind::HelmChart, gvk("HelmChart", SOURCE, "v1beta2", "helmcharts"), KindRole::Source),
    (FluxKind::Kustomization, gvk("Kustomization", KUSTOMIZE, "v1", "kustomizations"), KindRole::Deployment),
    (FluxKind::HelmRelease, gvk("HelmRelease", HELM, "v2beta1", "helmreleases"), KindRole::Deployment),
    (FluxKind::Terraform, gvk("Terraform", TF, "v1alpha2", "terraforms"), KindRole::Deployment),
    (FluxKind::ImageRepository, gvk("ImageRepository", IMAGE, "v1beta2", "imagerepositories"), KindRole::Automation),
    (FluxKind::ImagePolicy, gvk("ImagePolicy", IMAGE, "v1beta2", "imagepolicies"), KindRole::Automation),
    (
        FluxKind::ImageUpdateAutomation,
        gvk("ImageUpdateAutomation", IMAGE, "v1beta1", "imageupdateautomations"),
        KindRole::Automation,
    ),
    (FluxKind::Provider, gvk("Provider", NOTIFICATION, "v1beta2", "providers"), KindRole::Notification),
    (FluxKind::Alert, gvk("Alert", NOTIFICATION, "v1beta2", "alerts"), KindRole::Notification),
    (FluxKind::Receiver, gvk("Receiver", NOTIFICATION, "v1", "receivers"), KindRole::Notification),
];

impl FluxKind {
    pub fn all() -> impl Iterator<Item = FluxKind> { KIND_TABLE.iter().map(|(k, _, _)| *k) }

    // Table rows follow variant declaration order.
    fn row(self) -> &'static (FluxKind, Gvk, KindRole) { &KIND_TABLE[self as usize] }

    pub fn gvk(self) -> Gvk { self.row().1 }

    pub fn role(self) -> KindRole { self.row().2 }

    pub fn as_str(self) -> &'static str { self.row().1.kind }
}

impl std::fmt::Display for FluxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for FluxKind {
    type Err = UnknownKind;

    /// Exact kind name first, then a case-insensitive match for CLI input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KIND_TABLE
            .iter()
            .find(|(_, g, _)| g.kind == s)
            .or_else(|| KIND_TABLE.iter().find(|(_, g, _)| g.kind.eq_ignore_ascii_case(s)))
            .map(|(k, _, _)| *k)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

pub fn gvk_from_kind(kind: &str) -> Result<Gvk, UnknownKind> {
    kind.parse::<FluxKind>().map(FluxKind::gvk)
}

/// `/apis/{group}/{version}/namespaces/{namespace}/{plural}/{name}`
pub fn build_path(name: &str, namespace: &str, gvk: &Gvk) -> Result<String, PathError> {
    let parts = [
        ("group", gvk.group),
        ("version", gvk.version),
        ("plural", gvk.plural),
        ("namespace", namespace),
        ("name", name),
    ];
    if let Some((field, _)) = parts.iter().find(|(_, v)| v.is_empty()) {
        return Err(PathError::Empty(*field));
    }
    Ok(format!("/apis/{}/{}/namespaces/{}/{}/{}", gvk.group, gvk.version, namespace, gvk.plural, name))
}

/// Addresses one object inside one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceRef {
    pub gvk: Gvk,
    pub name: String,
    pub namespace: String,
    pub cluster_name: String,
}

impl ResourceRef {
    pub fn new(gvk: Gvk, name: impl Into<String>, namespace: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self { gvk, name: name.into(), namespace: namespace.into(), cluster_name: cluster_name.into() }
    }

    pub fn path(&self) -> Result<String, PathError> { build_path(&self.name, &self.namespace, &self.gvk) }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}@{}", self.gvk.kind, self.namespace, self.name, self.cluster_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_path_concatenates_components() {
        let g = Gvk { kind: "K", group: "g", version: "v", plural: "p" };
        assert_eq!(
            build_path("test-name", "test-namespace", &g).expect("path"),
            "/apis/g/v/namespaces/test-namespace/p/test-name"
        );
    }

    #[test]
    fn build_path_rejects_empty_fields() {
        let g = FluxKind::Kustomization.gvk();
        assert_eq!(build_path("", "ns", &g), Err(PathError::Empty("name")));
        assert_eq!(build_path("app", "", &g), Err(PathError::Empty("namespace")));
        let no_group = Gvk { group: "", ..g };
        assert_eq!(build_path("app", "ns", &no_group), Err(PathError::Empty("group")));
    }

    #[test]
    fn kind_table_rows_are_consistent() {
        for (i, k) in FluxKind::all().enumerate() {
            assert_eq!(k as usize, i);
            let g = k.gvk();
            assert_eq!(g.kind, k.as_str());
            assert_eq!(k.as_str().parse::<FluxKind>(), Ok(k));
            assert!(g.plural.ends_with('s'), "{} plural {}", g.kind, g.plural);
        }
    }

    #[test]
    fn gvk_from_kind_resolves_known_kinds() {
        let g = gvk_from_kind("HelmRelease").expect("known");
        assert_eq!((g.group, g.version), ("helm.toolkit.fluxcd.io", "v2beta1"));
        assert_eq!(g.plural, "helmreleases");
        assert_eq!(gvk_from_kind("gitrepository").map(|g| g.kind), Ok("GitRepository"));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert_eq!(gvk_from_kind("Deployment"), Err(UnknownKind("Deployment".into())));
        assert_eq!(gvk_from_kind(""), Err(UnknownKind(String::new())));
    }

    #[test]
    fn roles_split_sources_from_deployments() {
        assert_eq!(FluxKind::OCIRepository.role(), KindRole::Source);
        assert_eq!(FluxKind::Kustomization.role(), KindRole::Deployment);
        assert_eq!(FluxKind::Terraform.role(), KindRole::Deployment);
        assert_eq!(FluxKind::Alert.role(), KindRole::Notification);
    }

    #[test]
    fn resource_ref_path() {
        let r = ResourceRef::new(FluxKind::GitRepository.gvk(), "podinfo", "flux-system", "prod");
        assert_eq!(r.path().expect("path"), "/apis/source.toolkit.fluxcd.io/v1/namespaces/flux-system/gitrepositories/podinfo");
        assert_eq!(r.to_string(), "GitRepository/flux-system/podinfo@prod");
    }
}
