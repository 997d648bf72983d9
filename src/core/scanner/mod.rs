// src/core/scanner/mod.rs

// Every probe the analyzer runs, grouped by the kind of signal it gathers.
pub mod content_scanner;
pub mod dns_scanner;
pub mod entropy_scanner;
pub mod http_scanner;
pub mod lexical_scanner;
pub mod ssl_scanner;
pub mod whois_scanner;

use std::sync::Arc;

use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;

use crate::core::error::SetupError;
use crate::core::knowledge_base::KnowledgeBase;
use crate::core::rank::RankTable;
use crate::core::runner::Probe;

use self::content_scanner::{ContentProbe, build_page_client};
use self::dns_scanner::{DnsValidityProbe, IpResolutionProbe, build_resolver};
use self::entropy_scanner::EntropyProbe;
use self::http_scanner::{HttpProbe, build_inspection_client};
use self::lexical_scanner::{
    HomoglyphProbe, IpLiteralProbe, KeywordProbe, PunycodeProbe, RankProbe, ShortenerProbe, StructureProbe,
    SubdomainProbe, TldProbe,
};
use self::ssl_scanner::TlsProbe;
use self::whois_scanner::{RegistrationProbe, build_registry_client};

/// Long-lived resources shared by the probes, built once at startup.
#[derive(Clone)]
pub struct ProbeResources {
    pub ranks: Arc<RankTable>,
    pub knowledge: Arc<KnowledgeBase>,
    pub resolver: Arc<TokioAsyncResolver>,
    pub inspection_client: Client,
    pub registry_client: Client,
    pub page_client: Client,
}

impl ProbeResources {
    pub fn build(ranks: Arc<RankTable>, knowledge: Arc<KnowledgeBase>) -> Result<Self, SetupError> {
        Ok(Self {
            ranks,
            knowledge,
            resolver: Arc::new(build_resolver()),
            inspection_client: build_inspection_client()?,
            registry_client: build_registry_client()?,
            page_client: build_page_client()?,
        })
    }
}

/// The fixed, ordered probe set used for every analysis.
///
/// # Arguments
///
/// * `resources` - The shared rank table, knowledge base, resolver and HTTP clients.
///
/// # Returns
///
/// One probe per signal. Cheap lexical checks come first so they claim
/// concurrency permits before the network-bound probes.
pub fn default_probes(resources: &ProbeResources) -> Vec<Arc<dyn Probe>> {
    let kb = &resources.knowledge;
    vec![
        Arc::new(RankProbe::new(Arc::clone(&resources.ranks))),
        Arc::new(TldProbe::new(Arc::clone(kb))),
        Arc::new(IpLiteralProbe),
        Arc::new(PunycodeProbe),
        Arc::new(ShortenerProbe::new(Arc::clone(kb))),
        Arc::new(StructureProbe),
        Arc::new(KeywordProbe::new(Arc::clone(kb))),
        Arc::new(SubdomainProbe),
        Arc::new(HomoglyphProbe),
        Arc::new(EntropyProbe),
        Arc::new(IpResolutionProbe::new(Arc::clone(&resources.resolver))),
        Arc::new(DnsValidityProbe::new(Arc::clone(&resources.resolver))),
        Arc::new(RegistrationProbe::new(resources.registry_client.clone(), Arc::clone(kb))),
        Arc::new(HttpProbe::new(resources.inspection_client.clone())),
        Arc::new(TlsProbe::new(Arc::clone(kb))),
        Arc::new(ContentProbe::new(resources.page_client.clone(), Arc::clone(kb))),
    ]
}
