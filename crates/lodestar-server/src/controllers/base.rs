//! Generic pipeline-driven handlers shared by every kind.

use lodestar_proto::ApiResource;
use lodestar_proto::v1::ResourceKind;

use crate::pipeline::steps::{
    BuildNewState, BuildUpdateState, CheckDuplicate, Delete, ExtractId, LoadExisting, LoadForApply,
    Persist, ResolveSlug, ValidateInput,
};
use crate::pipeline::{Pipeline, PipelineError, RequestContext};

use super::Ctx;

fn context<R: ApiResource>(ctx: &Ctx, kind: ResourceKind, input: R) -> RequestContext<R> {
    RequestContext::new(kind, ctx.actor.clone(), ctx.store.clone(), input)
}

fn finish<R: ApiResource>(cx: RequestContext<R>) -> Result<R, tonic::Status> {
    cx.new_state
        .ok_or_else(|| tonic::Status::internal("pipeline completed without a new state"))
}

/// Create: Validate → ResolveSlug → CheckDuplicate → BuildNewState → Persist.
pub(crate) async fn create<R: ApiResource>(
    ctx: &Ctx,
    kind: ResourceKind,
    input: R,
) -> Result<R, tonic::Status> {
    let mut cx = context(ctx, kind, input);
    cx.set_new_state();
    Pipeline::named("create")
        .step(ValidateInput)
        .step(ResolveSlug)
        .step(CheckDuplicate)
        .step(BuildNewState)
        .step(Persist)
        .run(&mut cx)
        .await
        .map_err(PipelineError::into_status)?;
    finish(cx)
}

/// Update: Validate → ResolveSlug → LoadExisting → BuildUpdateState → Persist.
pub(crate) async fn update<R: ApiResource>(
    ctx: &Ctx,
    kind: ResourceKind,
    input: R,
) -> Result<R, tonic::Status> {
    let mut cx = context(ctx, kind, input);
    cx.set_new_state();
    Pipeline::named("update")
        .step(ValidateInput)
        .step(ResolveSlug)
        .step(LoadExisting)
        .step(BuildUpdateState)
        .step(Persist)
        .run(&mut cx)
        .await
        .map_err(PipelineError::into_status)?;
    finish(cx)
}

/// Delete: ExtractId → LoadExisting → Delete. Returns the deleted
/// resource as the audit-trail response.
pub(crate) async fn delete<R: ApiResource>(
    ctx: &Ctx,
    kind: ResourceKind,
    id: &str,
) -> Result<R, tonic::Status> {
    let mut input = R::default();
    input.metadata_mut().id = id.to_owned();
    let mut cx = context(ctx, kind, input);
    Pipeline::named("delete")
        .step(ExtractId)
        .step(LoadExisting)
        .step(Delete)
        .run(&mut cx)
        .await
        .map_err(PipelineError::into_status)?;
    cx.existing
        .ok_or_else(|| tonic::Status::internal("delete pipeline yielded no prior state"))
}

/// Apply: Validate → ResolveSlug → LoadForApply, then delegate to the
/// create or update tail. Returns the resource and whether it was created.
pub(crate) async fn apply<R: ApiResource>(
    ctx: &Ctx,
    kind: ResourceKind,
    input: R,
) -> Result<(R, bool), tonic::Status> {
    let mut cx = context(ctx, kind, input);
    cx.set_new_state();
    Pipeline::named("apply")
        .step(ValidateInput)
        .step(ResolveSlug)
        .step(LoadForApply)
        .run(&mut cx)
        .await
        .map_err(PipelineError::into_status)?;

    let created = cx.should_create == Some(true);
    let tail = if created {
        Pipeline::named("apply-create")
            .step(CheckDuplicate)
            .step(BuildNewState)
            .step(Persist)
    } else {
        Pipeline::named("apply-update")
            .step(BuildUpdateState)
            .step(Persist)
    };
    tail.run(&mut cx).await.map_err(PipelineError::into_status)?;
    Ok((finish(cx)?, created))
}

/// Apply for immutable kinds: create when the slug is free, conflict when
/// it is taken. There is no update path.
pub(crate) async fn apply_immutable<R: ApiResource>(
    ctx: &Ctx,
    kind: ResourceKind,
    input: R,
) -> Result<R, tonic::Status> {
    let mut cx = context(ctx, kind, input);
    cx.set_new_state();
    Pipeline::named("apply-immutable")
        .step(ValidateInput)
        .step(ResolveSlug)
        .step(LoadForApply)
        .run(&mut cx)
        .await
        .map_err(PipelineError::into_status)?;

    if cx.should_create != Some(true) {
        let (slug, id) = cx
            .existing
            .as_ref()
            .and_then(ApiResource::metadata)
            .map(|m| (m.slug.clone(), m.id.clone()))
            .unwrap_or_default();
        return Err(tonic::Status::already_exists(format!(
            "{} with slug '{slug}' already exists (id: {id})",
            kind.display_name()
        )));
    }

    Pipeline::named("apply-immutable-create")
        .step(CheckDuplicate)
        .step(BuildNewState)
        .step(Persist)
        .run(&mut cx)
        .await
        .map_err(PipelineError::into_status)?;
    finish(cx)
}

/// Get by id.
pub(crate) async fn get<R: ApiResource>(ctx: &Ctx, id: &str) -> Result<R, tonic::Status> {
    match ctx.store.get::<R>(id).await {
        Ok(resource) => Ok(resource),
        Err(lodestar_store::StoreError::NotFound { kind, id }) => {
            Err(tonic::Status::not_found(format!("{kind} '{id}' not found")))
        }
        Err(e) => Err(tonic::Status::internal(e.to_string())),
    }
}

/// Get by slug reference, with optional org filter.
pub(crate) async fn get_by_reference<R: ApiResource>(
    ctx: &Ctx,
    org: &str,
    reference: &str,
) -> Result<R, tonic::Status> {
    ctx.store
        .get_by_slug::<R>(org, reference)
        .await
        .map_err(|e| tonic::Status::internal(e.to_string()))?
        .ok_or_else(|| {
            tonic::Status::not_found(format!(
                "{} '{reference}' not found",
                R::KIND.display_name()
            ))
        })
}

/// List, filtered in memory by org when one is given.
pub(crate) async fn list<R: ApiResource>(ctx: &Ctx, org: &str) -> Result<Vec<R>, tonic::Status> {
    let all = ctx
        .store
        .list::<R>()
        .await
        .map_err(|e| tonic::Status::internal(e.to_string()))?;
    if org.is_empty() {
        return Ok(all);
    }
    Ok(all
        .into_iter()
        .filter(|r| r.metadata().is_some_and(|m| m.org == org))
        .collect())
}
