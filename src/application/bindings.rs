//! Evaluation of section/type rule bindings.

use std::sync::Arc;

use crate::application::repos::{BindingFilter, BindingsRepo, RepoError};
use crate::domain::targets::{BanDescriptor, InvalidationTarget};
use crate::domain::types::{BindType, SectionId, TypeId};

/// Kinds requested from [`BindingEvaluator::queries`].
///
/// The shape of the answer depends on the selector: a single `PURGE` yields
/// targets, a set yields ban descriptors, any other single kind yields raw
/// query strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindSelector {
    Single(BindType),
    Many(Vec<BindType>),
}

impl BindSelector {
    pub fn bans() -> Self {
        Self::Many(vec![BindType::Ban, BindType::FullBan])
    }

    fn kinds(&self) -> Vec<BindType> {
        match self {
            BindSelector::Single(kind) => vec![*kind],
            BindSelector::Many(kinds) => kinds.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingQuery {
    Target(InvalidationTarget),
    Ban(BanDescriptor),
    Raw(String),
}

#[derive(Clone)]
pub struct BindingEvaluator {
    repo: Arc<dyn BindingsRepo>,
}

impl BindingEvaluator {
    pub fn new(repo: Arc<dyn BindingsRepo>) -> Self {
        Self { repo }
    }

    pub async fn queries(
        &self,
        section_id: SectionId,
        type_id: TypeId,
        selector: &BindSelector,
    ) -> Result<Vec<BindingQuery>, RepoError> {
        let filter = BindingFilter::for_type(type_id).with_kinds(&selector.kinds());
        let bindings = self.repo.list_bindings(section_id, &filter).await?;

        Ok(bindings
            .into_iter()
            .map(|binding| match selector {
                BindSelector::Single(BindType::Purge) if binding.bind_type == BindType::Purge => {
                    BindingQuery::Target(InvalidationTarget::binding(&binding.query))
                }
                BindSelector::Many(_) => BindingQuery::Ban(BanDescriptor {
                    full: binding.bind_type == BindType::FullBan,
                    query: binding.query,
                }),
                BindSelector::Single(_) => BindingQuery::Raw(binding.query),
            })
            .collect())
    }

    /// `BINDING` targets from the PURGE bindings of a section/type.
    pub async fn purge_targets(
        &self,
        section_id: SectionId,
        type_id: TypeId,
    ) -> Result<Vec<InvalidationTarget>, RepoError> {
        let queries = self
            .queries(section_id, type_id, &BindSelector::Single(BindType::Purge))
            .await?;
        Ok(queries
            .into_iter()
            .filter_map(|query| match query {
                BindingQuery::Target(target) => Some(target),
                _ => None,
            })
            .collect())
    }

    /// Ban descriptors from the BAN and FULLBAN bindings of a section/type.
    pub async fn ban_descriptors(
        &self,
        section_id: SectionId,
        type_id: TypeId,
    ) -> Result<Vec<BanDescriptor>, RepoError> {
        let queries = self
            .queries(section_id, type_id, &BindSelector::bans())
            .await?;
        Ok(queries
            .into_iter()
            .filter_map(|query| match query {
                BindingQuery::Ban(descriptor) => Some(descriptor),
                _ => None,
            })
            .collect())
    }
}
