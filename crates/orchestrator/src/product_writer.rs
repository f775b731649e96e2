//! Product aggregate writer.
//!
//! A write moves through these stages:
//!
//! ```text
//! Validating ─► PersistingRoot ─► PersistingChildren ─► Committing ─► Refreshing ─► Done
//!      │               │                  │                  │
//!      └───────────────┴──────────────────┴──────────────────┴──► Aborted (rollback)
//! ```
//!
//! Natural keys are checked and variant SKUs resolved before the
//! transaction opens; uploads also happen up front so that no network call
//! runs while a transaction is held. Blobs uploaded by a write that later
//! aborts are deleted again.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ActorId, AggregateId, RecordId};
use domain::{
    AttributeInput, AuditStamp, ChildKind, CreateProduct, ImageInput, Product, ProductAggregate,
    ProductAttributeValue, ProductImage, ProductTag, ProductVariant, UpdateProduct, VariantInput,
    slugify,
};
use store::{Connection, ConnectionExt, ProductRepository, Store, StoreError, TransactionScope};
use thiserror::Error;
use uuid::Uuid;

use crate::assemble::{ProductView, ProductViewAssembler, ResponseAssembler, assemble_guarded};
use crate::config::WriterConfig;
use crate::error::{OrchestratorError, Result};
use crate::invalidate::CacheInvalidator;
use crate::receipt::{ResponseState, SkippedChild, WriteReceipt};
use crate::services::{BlobStore, CacheService};
use crate::sku::{ClaimedKeys, KeyProbe, ResolveError, SkuResolver};
use crate::upload::{ImageUploader, UploadLedger};

type ProductAssembler = dyn ResponseAssembler<Source = ProductAggregate, Output = ProductView>;

const CREATE: &str = "product create";
const UPDATE: &str = "product update";
const DELETE: &str = "product delete";
const READ: &str = "product read";

/// Natural keys of a product root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NaturalKey {
    Sku,
    Slug,
}

impl NaturalKey {
    fn field(self) -> &'static str {
        match self {
            NaturalKey::Sku => "sku",
            NaturalKey::Slug => "slug",
        }
    }

    fn from_constraint(constraint: &str) -> Option<Self> {
        match constraint {
            "products_sku_key" => Some(NaturalKey::Sku),
            "products_slug_key" => Some(NaturalKey::Slug),
            _ => None,
        }
    }
}

/// Why a product transaction was rolled back.
#[derive(Debug, Error)]
enum WriteAbort {
    #[error("root write failed: {0}")]
    Root(StoreError),

    #[error("{kind} write failed: {source}")]
    Child { kind: ChildKind, source: StoreError },

    #[error("product no longer exists")]
    Missing,

    #[error(transparent)]
    Store(#[from] StoreError),
}

enum RootWrite {
    Insert(Product),
    Update(Product),
}

/// Children prepared before the transaction, each tagged with its position
/// in the caller's input.
#[derive(Default)]
struct ChildPlan {
    /// Kinds whose existing rows are deleted before the new ones go in.
    replace: Vec<ChildKind>,
    images: Vec<(usize, ProductImage)>,
    variants: Vec<(usize, ProductVariant)>,
    attributes: Vec<(usize, ProductAttributeValue)>,
    tags: Vec<(usize, ProductTag)>,
}

/// Probes variant SKUs, ignoring variants of the product being written
/// since a replace-all removes them first.
struct VariantSkuProbe<'a, C> {
    conn: &'a mut C,
    owner: AggregateId,
}

#[async_trait]
impl<'a, C: Connection> KeyProbe for VariantSkuProbe<'a, C> {
    async fn is_taken(&mut self, key: &str) -> std::result::Result<bool, StoreError> {
        let holder = self.conn.variant_by_sku(key).await?;
        Ok(holder.is_some_and(|v| v.product_id != self.owner))
    }
}

fn sort_order(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

fn settle(
    result: store::Result<()>,
    kind: ChildKind,
    index: usize,
    skipped: &mut Vec<SkippedChild>,
) -> std::result::Result<(), WriteAbort> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_item_level() => {
            tracing::warn!(%kind, index, error = %e, "child skipped");
            skipped.push(SkippedChild::new(kind, index, e.to_string()));
            Ok(())
        }
        Err(source) => Err(WriteAbort::Child { kind, source }),
    }
}

async fn persist_product<C: Connection>(
    conn: &mut C,
    root: RootWrite,
    plan: ChildPlan,
) -> std::result::Result<Vec<SkippedChild>, WriteAbort> {
    let product_id = match &root {
        RootWrite::Insert(product) => {
            conn.insert_product(product).await.map_err(WriteAbort::Root)?;
            product.id
        }
        RootWrite::Update(product) => {
            if !conn.update_product(product).await.map_err(WriteAbort::Root)? {
                return Err(WriteAbort::Missing);
            }
            product.id
        }
    };

    for kind in plan.replace {
        let removed = conn
            .delete_children(product_id, kind)
            .await
            .map_err(|source| WriteAbort::Child { kind, source })?;
        tracing::debug!(%kind, removed, "existing children removed");
    }

    let mut skipped = Vec::new();
    for (index, image) in plan.images {
        settle(
            conn.insert_image(&image).await,
            ChildKind::Image,
            index,
            &mut skipped,
        )?;
    }
    for (index, variant) in plan.variants {
        settle(
            conn.insert_variant(&variant).await,
            ChildKind::Variant,
            index,
            &mut skipped,
        )?;
    }
    for (index, value) in plan.attributes {
        settle(
            conn.insert_attribute_value(&value).await,
            ChildKind::AttributeValue,
            index,
            &mut skipped,
        )?;
    }
    for (index, tag) in plan.tags {
        settle(conn.insert_tag(&tag).await, ChildKind::Tag, index, &mut skipped)?;
    }
    Ok(skipped)
}

async fn remove_product<C: Connection>(
    conn: &mut C,
    product_id: AggregateId,
) -> std::result::Result<u64, WriteAbort> {
    let mut removed = 0;
    for kind in ChildKind::ALL {
        removed += conn
            .delete_children(product_id, kind)
            .await
            .map_err(|source| WriteAbort::Child { kind, source })?;
    }
    if !conn
        .delete_product(product_id)
        .await
        .map_err(WriteAbort::Root)?
    {
        return Err(WriteAbort::Missing);
    }
    Ok(removed)
}

fn build_attributes(
    product_id: AggregateId,
    inputs: &[AttributeInput],
    now: DateTime<Utc>,
) -> Vec<(usize, ProductAttributeValue)> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            (
                index,
                ProductAttributeValue {
                    id: RecordId::new(),
                    product_id,
                    attribute_id: input.attribute_id,
                    value: input.value.trim().to_string(),
                    created_at: now,
                },
            )
        })
        .collect()
}

fn build_tags(
    product_id: AggregateId,
    tag_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Vec<(usize, ProductTag)> {
    tag_ids
        .iter()
        .enumerate()
        .map(|(index, tag_id)| {
            (
                index,
                ProductTag {
                    id: RecordId::new(),
                    product_id,
                    tag_id: *tag_id,
                    created_at: now,
                },
            )
        })
        .collect()
}

/// Creates, updates and deletes products together with their children.
pub struct ProductWriter<S, B, C>
where
    S: Store,
    B: BlobStore,
    C: CacheService,
{
    store: S,
    uploader: ImageUploader<B>,
    invalidator: CacheInvalidator<C>,
    resolver: SkuResolver,
    assembler: Arc<ProductAssembler>,
}

impl<S, B, C> ProductWriter<S, B, C>
where
    S: Store,
    B: BlobStore,
    C: CacheService,
{
    pub fn new(store: S, blobs: B, cache: C, config: WriterConfig) -> Self {
        Self {
            store,
            uploader: ImageUploader::new(blobs, config.upload),
            invalidator: CacheInvalidator::new(cache),
            resolver: SkuResolver::new(config.sku_max_attempts),
            assembler: Arc::new(ProductViewAssembler),
        }
    }

    /// Replaces the assembler used to build responses.
    pub fn with_assembler<A>(mut self, assembler: A) -> Self
    where
        A: ResponseAssembler<Source = ProductAggregate, Output = ProductView> + 'static,
    {
        self.assembler = Arc::new(assembler);
        self
    }

    /// Creates a product with its images, variants, attribute values and
    /// tags in one transaction.
    #[tracing::instrument(skip(self, cmd), fields(product_id = %cmd.product_id, sku = %cmd.sku))]
    pub async fn create(&self, cmd: CreateProduct) -> Result<WriteReceipt<ProductView>> {
        metrics::counter!("product_writes_total", "operation" => "create").increment(1);
        let started = Instant::now();
        cmd.validate()?;

        let product_id = cmd.product_id;
        let sku = cmd.sku.trim().to_string();
        let slug = cmd.resolved_slug();
        let mut conn = self.connect(CREATE).await?;

        self.ensure_key_free(&mut conn, NaturalKey::Sku, &sku, None, CREATE)
            .await?;
        self.ensure_key_free(&mut conn, NaturalKey::Slug, &slug, None, CREATE)
            .await?;

        let now = Utc::now();
        let product = Product {
            id: product_id,
            name: cmd.name.trim().to_string(),
            slug: slug.clone(),
            sku: sku.clone(),
            description: cmd.description.filter(|d| !d.trim().is_empty()),
            price: cmd.price,
            stock_quantity: cmd.stock_quantity,
            status: cmd.status,
            audit: AuditStamp::created(cmd.actor, now),
        };

        let mut skipped = Vec::new();
        let mut plan = ChildPlan {
            variants: self
                .prepare_variants(&mut conn, &product, &cmd.variants, now, &mut skipped, CREATE)
                .await?,
            attributes: build_attributes(product_id, &cmd.attributes, now),
            tags: build_tags(product_id, &cmd.tag_ids, now),
            ..ChildPlan::default()
        };
        let mut ledger = UploadLedger::default();
        plan.images = self
            .prepare_images(product_id, &cmd.images, now, &mut ledger, &mut skipped)
            .await;

        let mut scope = TransactionScope::new(conn);
        let outcome = scope
            .run_in_transaction(move |conn| {
                Box::pin(persist_product(conn, RootWrite::Insert(product), plan))
            })
            .await;
        match outcome {
            Ok(child_skips) => skipped.extend(child_skips),
            Err(abort) => {
                return Err(self
                    .aborted(CREATE, product_id, abort, ledger, &sku, &slug)
                    .await);
            }
        }

        self.invalidator
            .invalidate_product(product_id, &[&slug])
            .await;
        let response = self.refresh(scope.connection(), product_id).await;
        self.record_duration("create", started);
        tracing::info!(skipped = skipped.len(), "product created");

        Ok(WriteReceipt {
            id: product_id,
            response,
            skipped,
        })
    }

    /// Updates a product's scalar fields and replaces every child
    /// collection the command supplies.
    #[tracing::instrument(skip(self, cmd), fields(product_id = %cmd.product_id))]
    pub async fn update(&self, cmd: UpdateProduct) -> Result<WriteReceipt<ProductView>> {
        metrics::counter!("product_writes_total", "operation" => "update").increment(1);
        let started = Instant::now();
        cmd.validate()?;

        let product_id = cmd.product_id;
        let mut conn = self.connect(UPDATE).await?;
        let existing = conn
            .load_product_aggregate(product_id)
            .await
            .map_err(|e| OrchestratorError::internal(UPDATE, e))?
            .ok_or_else(|| OrchestratorError::not_found("product", product_id))?;

        let mut product = existing.product.clone();
        if let Some(sku) = &cmd.sku {
            let sku = sku.trim();
            if sku != product.sku {
                self.ensure_key_free(
                    &mut conn,
                    NaturalKey::Sku,
                    sku,
                    Some(product_id),
                    UPDATE,
                )
                .await?;
                product.sku = sku.to_string();
            }
        }
        if let Some(slug) = &cmd.slug {
            let slug = slugify(slug);
            if slug != product.slug {
                self.ensure_key_free(
                    &mut conn,
                    NaturalKey::Slug,
                    &slug,
                    Some(product_id),
                    UPDATE,
                )
                .await?;
                product.slug = slug;
            }
        }
        if let Some(name) = &cmd.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = &cmd.description {
            product.description = Some(description.clone()).filter(|d| !d.trim().is_empty());
        }
        if let Some(price) = cmd.price {
            product.price = price;
        }
        if let Some(stock) = cmd.stock_quantity {
            product.stock_quantity = stock;
        }
        if let Some(status) = cmd.status {
            product.status = status;
        }
        let now = Utc::now();
        product.audit.touch(cmd.actor.clone(), now);

        let mut skipped = Vec::new();
        let mut plan = ChildPlan::default();
        if let Some(variants) = &cmd.variants {
            plan.replace.push(ChildKind::Variant);
            plan.variants = self
                .prepare_variants(&mut conn, &product, variants, now, &mut skipped, UPDATE)
                .await?;
        }
        if let Some(attributes) = &cmd.attributes {
            plan.replace.push(ChildKind::AttributeValue);
            plan.attributes = build_attributes(product_id, attributes, now);
        }
        if let Some(tag_ids) = &cmd.tag_ids {
            plan.replace.push(ChildKind::Tag);
            plan.tags = build_tags(product_id, tag_ids, now);
        }
        let mut ledger = UploadLedger::default();
        let mut dropped_urls = Vec::new();
        if let Some(images) = &cmd.images {
            plan.replace.push(ChildKind::Image);
            plan.images = self
                .prepare_images(product_id, images, now, &mut ledger, &mut skipped)
                .await;
            dropped_urls = existing
                .images
                .iter()
                .map(|i| i.url.clone())
                .filter(|url| !plan.images.iter().any(|(_, i)| &i.url == url))
                .collect();
        }

        let old_slug = existing.product.slug.clone();
        let sku = product.sku.clone();
        let slug = product.slug.clone();

        let mut scope = TransactionScope::new(conn);
        let outcome = scope
            .run_in_transaction(move |conn| {
                Box::pin(persist_product(conn, RootWrite::Update(product), plan))
            })
            .await;
        match outcome {
            Ok(child_skips) => skipped.extend(child_skips),
            Err(abort) => {
                return Err(self
                    .aborted(UPDATE, product_id, abort, ledger, &sku, &slug)
                    .await);
            }
        }

        if old_slug == slug {
            self.invalidator.invalidate_product(product_id, &[&slug]).await;
        } else {
            self.invalidator
                .invalidate_product(product_id, &[&old_slug, &slug])
                .await;
        }
        for url in &dropped_urls {
            self.uploader.delete_best_effort(url).await;
        }
        let response = self.refresh(scope.connection(), product_id).await;
        self.record_duration("update", started);
        tracing::info!(skipped = skipped.len(), "product updated");

        Ok(WriteReceipt {
            id: product_id,
            response,
            skipped,
        })
    }

    /// Deletes a product and everything it owns.
    ///
    /// The receipt carries the product as it was just before deletion.
    #[tracing::instrument(skip(self))]
    pub async fn delete(
        &self,
        product_id: AggregateId,
        actor: ActorId,
    ) -> Result<WriteReceipt<ProductView>> {
        metrics::counter!("product_writes_total", "operation" => "delete").increment(1);
        let started = Instant::now();

        let mut conn = self.connect(DELETE).await?;
        let existing = conn
            .load_product_aggregate(product_id)
            .await
            .map_err(|e| OrchestratorError::internal(DELETE, e))?
            .ok_or_else(|| OrchestratorError::not_found("product", product_id))?;
        let response = assemble_guarded(&*self.assembler, &existing);

        let mut scope = TransactionScope::new(conn);
        let outcome = scope
            .run_in_transaction(move |conn| Box::pin(remove_product(conn, product_id)))
            .await;
        let removed = match outcome {
            Ok(removed) => removed,
            Err(abort) => {
                let (sku, slug) = (&existing.product.sku, &existing.product.slug);
                return Err(self
                    .aborted(DELETE, product_id, abort, UploadLedger::default(), sku, slug)
                    .await);
            }
        };

        self.invalidator
            .invalidate_product(product_id, &[&existing.product.slug])
            .await;
        for image in &existing.images {
            self.uploader.delete_best_effort(&image.url).await;
        }
        self.record_duration("delete", started);
        tracing::info!(%actor, children = removed, "product deleted");

        Ok(WriteReceipt {
            id: product_id,
            response,
            skipped: Vec::new(),
        })
    }

    /// Loads and maps a product.
    pub async fn get(&self, product_id: AggregateId) -> Result<ProductView> {
        let mut conn = self.connect(READ).await?;
        let aggregate = conn
            .load_product_aggregate(product_id)
            .await
            .map_err(|e| OrchestratorError::internal(READ, e))?
            .ok_or_else(|| OrchestratorError::not_found("product", product_id))?;
        match assemble_guarded(&*self.assembler, &aggregate) {
            ResponseState::Ready(view) => Ok(view),
            _ => Err(OrchestratorError::Failed(READ)),
        }
    }

    async fn connect(&self, operation: &'static str) -> Result<S::Conn> {
        self.store
            .connect()
            .await
            .map_err(|e| OrchestratorError::internal(operation, e))
    }

    /// Fails with `Conflict` if the key is held by any product other than
    /// `owner`. Creates pass no owner, so every holder conflicts.
    async fn ensure_key_free(
        &self,
        conn: &mut S::Conn,
        key: NaturalKey,
        value: &str,
        owner: Option<AggregateId>,
        operation: &'static str,
    ) -> Result<()> {
        let holder = match key {
            NaturalKey::Sku => conn.product_by_sku(value).await,
            NaturalKey::Slug => conn.product_by_slug(value).await,
        }
        .map_err(|e| OrchestratorError::internal(operation, e))?;

        match holder {
            Some(other) if Some(other.id) != owner => {
                tracing::info!(field = key.field(), %value, "natural key already in use");
                Err(OrchestratorError::Conflict {
                    field: key.field(),
                    value: value.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    async fn prepare_variants(
        &self,
        conn: &mut S::Conn,
        product: &Product,
        inputs: &[VariantInput],
        now: DateTime<Utc>,
        skipped: &mut Vec<SkippedChild>,
        operation: &'static str,
    ) -> Result<Vec<(usize, ProductVariant)>> {
        let mut claimed = ClaimedKeys::default();
        let mut probe = VariantSkuProbe {
            conn,
            owner: product.id,
        };
        let mut variants = Vec::with_capacity(inputs.len());

        for (index, input) in inputs.iter().enumerate() {
            let resolved = self
                .resolver
                .resolve(&input.sku, &product.sku, index, &mut claimed, &mut probe)
                .await;
            match resolved {
                Ok(sku) => variants.push((
                    index,
                    ProductVariant {
                        id: RecordId::new(),
                        product_id: product.id,
                        sku,
                        name: input.name.trim().to_string(),
                        price: input.price.unwrap_or(product.price),
                        stock_quantity: input.stock_quantity,
                        created_at: now,
                    },
                )),
                Err(e @ ResolveError::Exhausted { .. }) => {
                    tracing::warn!(index, error = %e, "variant skipped");
                    skipped.push(SkippedChild::new(ChildKind::Variant, index, e.to_string()));
                }
                Err(ResolveError::Probe(e)) => {
                    return Err(OrchestratorError::internal(operation, e));
                }
            }
        }
        Ok(variants)
    }

    async fn prepare_images(
        &self,
        product_id: AggregateId,
        inputs: &[ImageInput],
        now: DateTime<Utc>,
        ledger: &mut UploadLedger,
        skipped: &mut Vec<SkippedChild>,
    ) -> Vec<(usize, ProductImage)> {
        let mut images = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            match self.uploader.resolve(&input.source, ledger).await {
                Ok(url) => images.push((
                    index,
                    ProductImage {
                        id: RecordId::new(),
                        product_id,
                        url,
                        alt_text: input.alt_text.clone(),
                        sort_order: sort_order(index),
                        is_primary: input.is_primary,
                        created_at: now,
                    },
                )),
                Err(e) => {
                    tracing::warn!(index, error = %e, "image skipped");
                    skipped.push(SkippedChild::new(ChildKind::Image, index, e.to_string()));
                }
            }
        }

        // Exactly one primary: the first flagged one, else the first image.
        let primary = images
            .iter()
            .position(|(_, image)| image.is_primary)
            .unwrap_or(0);
        for (position, (_, image)) in images.iter_mut().enumerate() {
            image.is_primary = position == primary;
        }
        images
    }

    async fn aborted(
        &self,
        operation: &'static str,
        product_id: AggregateId,
        abort: WriteAbort,
        ledger: UploadLedger,
        sku: &str,
        slug: &str,
    ) -> OrchestratorError {
        metrics::counter!("aggregate_write_aborted_total", "aggregate" => "product")
            .increment(1);
        self.uploader.compensate(ledger).await;

        match abort {
            WriteAbort::Root(StoreError::UniqueViolation { constraint }) => {
                match NaturalKey::from_constraint(&constraint) {
                    Some(key) => {
                        tracing::warn!(%product_id, field = key.field(), "natural key taken concurrently");
                        let value = match key {
                            NaturalKey::Sku => sku,
                            NaturalKey::Slug => slug,
                        };
                        OrchestratorError::Conflict {
                            field: key.field(),
                            value: value.to_string(),
                        }
                    }
                    None if constraint == "products_pkey" => {
                        tracing::warn!(%product_id, "product id already exists");
                        OrchestratorError::Conflict {
                            field: "id",
                            value: product_id.to_string(),
                        }
                    }
                    None => OrchestratorError::internal(
                        operation,
                        format!("unique constraint {} on product root", constraint),
                    ),
                }
            }
            WriteAbort::Missing => OrchestratorError::not_found("product", product_id),
            other => {
                tracing::error!(%product_id, error = %other, "{} rolled back", operation);
                OrchestratorError::Failed(operation)
            }
        }
    }

    async fn refresh(
        &self,
        conn: &mut S::Conn,
        product_id: AggregateId,
    ) -> ResponseState<ProductView> {
        match conn.load_product_aggregate(product_id).await {
            Ok(Some(aggregate)) => assemble_guarded(&*self.assembler, &aggregate),
            Ok(None) => {
                tracing::warn!(%product_id, "committed product not found on read-back");
                ResponseState::ReadBackMissing
            }
            Err(e) => {
                tracing::warn!(%product_id, error = %e, "read-back after commit failed");
                ResponseState::ReadBackMissing
            }
        }
    }

    fn record_duration(&self, operation: &'static str, started: Instant) {
        metrics::histogram!("product_write_duration_seconds", "operation" => operation)
            .record(started.elapsed().as_secs_f64());
    }
}
