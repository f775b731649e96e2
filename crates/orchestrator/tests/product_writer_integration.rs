//! Integration tests for the product writer against the in-memory store.

use domain::{
    AttributeInput, ChildKind, CreateProduct, ImageInput, Money, ProductAggregate, UpdateProduct,
    VariantInput,
};
use orchestrator::{
    AssembleError, InMemoryBlobStore, InMemoryCache, OrchestratorError, ProductView,
    ProductWriter, ResponseAssembler, ResponseState, WriterConfig,
};
use store::{ConnectionExt, FaultKind, FaultPoint, InMemoryStore, Store};
use uuid::Uuid;

type TestWriter = ProductWriter<InMemoryStore, InMemoryBlobStore, InMemoryCache>;

struct TestHarness {
    writer: TestWriter,
    store: InMemoryStore,
    blobs: InMemoryBlobStore,
    cache: InMemoryCache,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(WriterConfig::default())
    }

    fn with_config(config: WriterConfig) -> Self {
        let store = InMemoryStore::new();
        let blobs = InMemoryBlobStore::default();
        let cache = InMemoryCache::new();
        let writer = ProductWriter::new(store.clone(), blobs.clone(), cache.clone(), config);
        Self {
            writer,
            store,
            blobs,
            cache,
        }
    }

    async fn load(&self, cmd_id: common::AggregateId) -> Option<ProductAggregate> {
        let mut conn = self.store.connect().await.unwrap();
        conn.load_product_aggregate(cmd_id).await.unwrap()
    }
}

fn png(name: &str) -> ImageInput {
    ImageInput::upload(name, "image/png", vec![0x89, 0x50, 0x4e, 0x47])
}

fn mug() -> CreateProduct {
    CreateProduct::new("Enamel Mug", "MUG-1", Money::from_cents(1500))
}

struct Panicking;

impl ResponseAssembler for Panicking {
    type Source = ProductAggregate;
    type Output = ProductView;

    fn assemble(&self, _: &ProductAggregate) -> Result<ProductView, AssembleError> {
        panic!("assembler bug")
    }
}

#[tokio::test]
async fn test_create_persists_root_and_children() {
    let h = TestHarness::new();
    let tag = Uuid::new_v4();
    let cmd = CreateProduct {
        tag_ids: vec![tag],
        attributes: vec![AttributeInput {
            attribute_id: Uuid::new_v4(),
            value: " Blue ".to_string(),
        }],
        ..mug()
    }
    .with_image(png("front.png"))
    .with_variant(VariantInput::new("MUG-1-S", "Small", 3))
    .with_variant(VariantInput::new("MUG-1-L", "Large", 2).priced(Money::from_cents(1800)));

    let receipt = h.writer.create(cmd).await.unwrap();
    assert!(receipt.skipped.is_empty());

    let view = receipt.response.into_ready().unwrap();
    assert_eq!(view.slug, "enamel-mug");
    assert_eq!(view.variants.len(), 2);
    assert_eq!(view.variants[0].price, Money::from_cents(1500));
    assert_eq!(view.variants[1].price, Money::from_cents(1800));
    assert_eq!(view.available_stock, 5);
    assert_eq!(view.attributes[0].value, "Blue");
    assert_eq!(view.tag_ids, vec![tag]);
    assert_eq!(view.images.len(), 1);
    assert!(view.images[0].is_primary);
    assert!(h.blobs.contains(&view.images[0].url));
}

#[tokio::test]
async fn test_disallowed_image_is_skipped_not_fatal() {
    let h = TestHarness::new();
    let cmd = mug()
        .with_image(png("a.png"))
        .with_image(ImageInput::upload("b.pdf", "application/pdf", vec![1, 2, 3]))
        .with_image(png("c.png"));

    let receipt = h.writer.create(cmd).await.unwrap();

    assert_eq!(receipt.skipped.len(), 1);
    assert_eq!(receipt.skipped[0].kind, ChildKind::Image);
    assert_eq!(receipt.skipped[0].index, 1);
    assert_eq!(h.store.child_count(ChildKind::Image).await, 2);
    assert_eq!(h.blobs.upload_calls(), 2);

    let view = receipt.response.into_ready().unwrap();
    assert_eq!(view.images[0].sort_order, 0);
    assert_eq!(view.images[1].sort_order, 2);
    assert_eq!(view.images.iter().filter(|i| i.is_primary).count(), 1);
}

#[tokio::test]
async fn test_flagged_image_becomes_the_only_primary() {
    let h = TestHarness::new();
    let cmd = mug()
        .with_image(ImageInput::url("https://img.test/1.png"))
        .with_image(ImageInput::url("https://img.test/2.png").primary())
        .with_image(ImageInput::url("https://img.test/3.png").primary());

    let view = h
        .writer
        .create(cmd)
        .await
        .unwrap()
        .response
        .into_ready()
        .unwrap();

    assert_eq!(
        view.primary_image_url.as_deref(),
        Some("https://img.test/2.png")
    );
    assert_eq!(view.images.iter().filter(|i| i.is_primary).count(), 1);
    assert_eq!(h.blobs.upload_calls(), 0);
}

#[tokio::test]
async fn test_duplicate_sku_is_a_conflict() {
    let h = TestHarness::new();
    h.writer.create(mug()).await.unwrap();

    let again = CreateProduct::new("Another Mug", "MUG-1", Money::from_cents(900))
        .with_image(png("x.png"));
    let err = h.writer.create(again).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Conflict { field: "sku", ref value } if value == "MUG-1"
    ));
    assert_eq!(h.store.product_count().await, 1);
    assert_eq!(h.blobs.upload_calls(), 0);
}

#[tokio::test]
async fn test_duplicate_slug_is_a_conflict() {
    let h = TestHarness::new();
    h.writer.create(mug()).await.unwrap();

    let err = h
        .writer
        .create(CreateProduct::new("Enamel Mug", "MUG-2", Money::from_cents(900)))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Conflict { field: "slug", .. }));
}

#[tokio::test]
async fn test_repeated_create_with_same_id_is_a_conflict() {
    let h = TestHarness::new();
    let cmd = mug().with_image(png("front.png"));
    let id = cmd.product_id;
    h.writer.create(cmd.clone()).await.unwrap();

    let err = h.writer.create(cmd).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Conflict { field: "sku", ref value } if value == "MUG-1"
    ));
    assert_eq!(h.store.product_count().await, 1);
    assert_eq!(h.blobs.blob_count(), 1);

    let renamed = CreateProduct {
        product_id: id,
        ..CreateProduct::new("Travel Mug", "MUG-9", Money::from_cents(900))
    };
    let err = h.writer.create(renamed).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Conflict { field: "id", .. }));
    assert_eq!(h.store.product_count().await, 1);
}

#[tokio::test]
async fn test_failed_read_back_keeps_the_committed_product() {
    let h = TestHarness::new();
    let cmd = mug().with_variant(VariantInput::new("MUG-1-S", "Small", 3));
    let id = cmd.product_id;
    h.store
        .set_fault(FaultPoint::ProductById, FaultKind::Unavailable);

    let receipt = h.writer.create(cmd).await.unwrap();

    assert_eq!(receipt.id, id);
    assert!(matches!(receipt.response, ResponseState::ReadBackMissing));
    h.store.clear_fault(FaultPoint::ProductById);
    let stored = h.load(id).await.unwrap();
    assert_eq!(stored.product.sku, "MUG-1");
    assert_eq!(stored.variants.len(), 1);
}

#[tokio::test]
async fn test_invalid_command_is_rejected_before_any_work() {
    let h = TestHarness::new();
    let cmd = CreateProduct::new("Mug", "MUG-1", Money::from_cents(-5)).with_image(png("a.png"));

    let err = h.writer.create(cmd).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(h.blobs.upload_calls(), 0);
    assert_eq!(h.store.product_count().await, 0);
}

#[tokio::test]
async fn test_child_failure_rolls_back_and_deletes_uploads() {
    let h = TestHarness::new();
    h.store
        .set_fault(FaultPoint::InsertVariant, FaultKind::Unavailable);
    let cmd = mug()
        .with_image(png("a.png"))
        .with_image(png("b.png"))
        .with_variant(VariantInput::new("MUG-1-S", "Small", 1));

    let err = h.writer.create(cmd).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Failed("product create")));
    assert_eq!(h.store.product_count().await, 0);
    assert_eq!(h.store.child_count(ChildKind::Image).await, 0);
    assert_eq!(h.blobs.upload_calls(), 2);
    assert_eq!(h.blobs.blob_count(), 0);
}

#[tokio::test]
async fn test_commit_failure_rolls_back() {
    let h = TestHarness::new();
    h.store.set_fault(FaultPoint::Commit, FaultKind::Unavailable);

    let err = h
        .writer
        .create(mug().with_image(png("a.png")))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Failed(_)));
    assert_eq!(h.store.product_count().await, 0);
    assert_eq!(h.blobs.blob_count(), 0);
}

#[tokio::test]
async fn test_item_level_child_errors_are_skipped() {
    let h = TestHarness::new();
    h.store
        .set_fault(FaultPoint::InsertAttributeValue, FaultKind::Constraint);
    let tag = Uuid::new_v4();
    let cmd = CreateProduct {
        tag_ids: vec![tag, tag],
        attributes: vec![AttributeInput {
            attribute_id: Uuid::new_v4(),
            value: "Blue".to_string(),
        }],
        ..mug()
    };

    let receipt = h.writer.create(cmd).await.unwrap();

    assert_eq!(receipt.skipped_of(ChildKind::AttributeValue), 1);
    assert_eq!(receipt.skipped_of(ChildKind::Tag), 1);
    assert_eq!(receipt.skipped.iter().find(|s| s.kind == ChildKind::Tag).unwrap().index, 1);
    assert_eq!(h.store.product_count().await, 1);
    assert_eq!(h.store.child_count(ChildKind::Tag).await, 1);
}

#[tokio::test]
async fn test_variant_skus_are_suffixed_past_collisions() {
    let h = TestHarness::new();
    let holder = CreateProduct::new("Holder", "HOLD", Money::from_cents(100))
        .with_variant(VariantInput::new("SKU1", "One", 1))
        .with_variant(VariantInput::new("SKU1-1", "Two", 1));
    h.writer.create(holder).await.unwrap();

    let cmd = mug()
        .with_variant(VariantInput::new("SKU1", "Red", 1))
        .with_variant(VariantInput::new("SKU1", "Blue", 1))
        .with_variant(VariantInput::new("", "Green", 1));
    let view = h
        .writer
        .create(cmd)
        .await
        .unwrap()
        .response
        .into_ready()
        .unwrap();

    let skus: Vec<_> = view.variants.iter().map(|v| v.sku.as_str()).collect();
    assert_eq!(skus, vec!["SKU1-2", "SKU1-3", "MUG-1-VAR-3"]);
}

#[tokio::test]
async fn test_exhausted_sku_skips_the_variant() {
    let h = TestHarness::with_config(WriterConfig {
        sku_max_attempts: Some(1),
        ..WriterConfig::default()
    });
    let holder = CreateProduct::new("Holder", "HOLD", Money::from_cents(100))
        .with_variant(VariantInput::new("DUP", "One", 1))
        .with_variant(VariantInput::new("DUP-1", "Two", 1));
    h.writer.create(holder).await.unwrap();

    let receipt = h
        .writer
        .create(mug().with_variant(VariantInput::new("DUP", "Red", 1)))
        .await
        .unwrap();

    assert_eq!(receipt.skipped_of(ChildKind::Variant), 1);
    assert_eq!(h.store.child_count(ChildKind::Variant).await, 2);
}

#[tokio::test]
async fn test_update_replaces_supplied_collections_only() {
    let h = TestHarness::new();
    let tag = Uuid::new_v4();
    let cmd = CreateProduct {
        tag_ids: vec![tag],
        ..mug()
    }
    .with_variant(VariantInput::new("A", "A", 1))
    .with_variant(VariantInput::new("B", "B", 1));
    let id = cmd.product_id;
    h.writer.create(cmd).await.unwrap();

    let update = UpdateProduct {
        name: Some("Stoneware Mug".to_string()),
        variants: Some(vec![
            VariantInput::new("C", "C", 4),
            VariantInput::new("A", "A again", 1),
        ]),
        ..UpdateProduct::new(id)
    };
    let receipt = h.writer.update(update).await.unwrap();
    let view = receipt.response.into_ready().unwrap();

    let skus: Vec<_> = view.variants.iter().map(|v| v.sku.as_str()).collect();
    assert_eq!(skus, vec!["C", "A"]);
    assert_eq!(view.name, "Stoneware Mug");
    assert_eq!(view.slug, "enamel-mug");
    assert_eq!(view.tag_ids, vec![tag]);
    assert!(view.updated_at.is_some());
}

#[tokio::test]
async fn test_update_drops_variants_missing_from_the_new_set() {
    let h = TestHarness::new();
    let cmd = mug()
        .with_variant(VariantInput::new("A", "A", 1))
        .with_variant(VariantInput::new("B", "B", 1));
    let id = cmd.product_id;
    h.writer.create(cmd).await.unwrap();
    assert_eq!(h.store.child_count(ChildKind::Variant).await, 2);

    let update = UpdateProduct {
        variants: Some(vec![VariantInput::new("C", "C", 4)]),
        ..UpdateProduct::new(id)
    };
    h.writer.update(update).await.unwrap();

    assert_eq!(h.store.child_count(ChildKind::Variant).await, 1);
    let stored = h.load(id).await.unwrap();
    assert_eq!(stored.variants[0].sku, "C");
    assert_eq!(stored.variants[0].stock_quantity, 4);
}

#[tokio::test]
async fn test_update_deletes_blobs_of_replaced_images() {
    let h = TestHarness::new();
    let cmd = mug().with_image(png("old.png"));
    let id = cmd.product_id;
    let created = h.writer.create(cmd).await.unwrap();
    let old_url = created.response.ready().unwrap().images[0].url.clone();

    let update = UpdateProduct {
        images: Some(vec![png("new.png")]),
        ..UpdateProduct::new(id)
    };
    let view = h
        .writer
        .update(update)
        .await
        .unwrap()
        .response
        .into_ready()
        .unwrap();

    assert!(!h.blobs.contains(&old_url));
    assert!(h.blobs.contains(&view.images[0].url));
    assert_eq!(h.store.child_count(ChildKind::Image).await, 1);
}

#[tokio::test]
async fn test_update_slug_change_invalidates_both_slugs() {
    let h = TestHarness::new();
    let cmd = mug();
    let id = cmd.product_id;
    h.writer.create(cmd).await.unwrap();
    h.cache.insert("product:slug:enamel-mug", "{}");
    h.cache.insert("product:slug:tin-mug", "{}");
    h.cache.insert("products:list:page=1", "[]");

    let update = UpdateProduct {
        slug: Some("Tin Mug".to_string()),
        ..UpdateProduct::new(id)
    };
    h.writer.update(update).await.unwrap();

    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_update_missing_product_is_not_found() {
    let h = TestHarness::new();
    let err = h
        .writer
        .update(UpdateProduct::new(common::AggregateId::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound { entity: "product", .. }));
}

#[tokio::test]
async fn test_mapping_panic_keeps_the_commit() {
    let store = InMemoryStore::new();
    let writer = ProductWriter::new(
        store.clone(),
        InMemoryBlobStore::default(),
        InMemoryCache::new(),
        WriterConfig::default(),
    )
    .with_assembler(Panicking);

    let receipt = writer.create(mug()).await.unwrap();

    assert_eq!(
        receipt.response,
        ResponseState::MappingFailed("assembler bug".to_string())
    );
    assert_eq!(store.product_count().await, 1);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let h = TestHarness::new();
    let cmd = mug()
        .with_image(png("a.png"))
        .with_variant(VariantInput::new("MUG-1-S", "Small", 1));
    let id = cmd.product_id;
    h.writer.create(cmd).await.unwrap();
    h.cache.insert(format!("product:{}", id), "{}");

    let receipt = h
        .writer
        .delete(id, common::ActorId::new("admin"))
        .await
        .unwrap();

    assert_eq!(receipt.response.ready().unwrap().sku, "MUG-1");
    assert!(h.load(id).await.is_none());
    assert_eq!(h.store.child_count(ChildKind::Variant).await, 0);
    assert_eq!(h.blobs.blob_count(), 0);
    assert!(h.cache.is_empty());

    let err = h
        .writer
        .delete(id, common::ActorId::system())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound { .. }));
}

#[tokio::test]
async fn test_get_maps_the_stored_aggregate() {
    let h = TestHarness::new();
    let cmd = mug();
    let id = cmd.product_id;
    h.writer.create(cmd).await.unwrap();

    let view = h.writer.get(id).await.unwrap();
    assert_eq!(view.price_display, "$15.00");
}
