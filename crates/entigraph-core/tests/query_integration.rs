//! Integration tests for query compilation and execution against the
//! embedded store.

use std::sync::Arc;

use chrono::NaiveDate;
use entigraph_core::catalog::{EntityDef, PropertyDescriptor, Registry, ScalarType, SchemaBundle};
use entigraph_core::query::{JoinPlan, PathResolver};
use entigraph_core::storage::{StorageConfig, StorageEngine};
use entigraph_core::{Error, Query, QueryConfig};
use entigraph_proto::{compact_reference, value_map, Criterion, Pagination, Value, ValueMap};
use pretty_assertions::assert_eq;

struct TestContext {
    engine: StorageEngine,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::build(sales_schema()).unwrap());
        let engine = StorageEngine::open(&StorageConfig::new(dir.path()), registry).unwrap();
        Self { engine, _dir: dir }
    }

    fn registry(&self) -> &Registry {
        self.engine.registry()
    }

    fn insert(&self, entity: &str, fields: ValueMap) -> i64 {
        self.engine.insert(entity, fields).unwrap().id
    }

    fn query(&self, entity: &str) -> Query<'_> {
        Query::new(self.registry(), entity).unwrap()
    }

    fn ids(&self, query: &Query<'_>) -> Vec<i64> {
        query
            .fetch(&self.engine, 0, 0)
            .unwrap()
            .into_iter()
            .map(|row| row.id)
            .collect()
    }
}

fn sales_schema() -> SchemaBundle {
    SchemaBundle::new()
        .with_entity(
            EntityDef::new("Order")
                .with_property(PropertyDescriptor::scalar("total", ScalarType::Float64))
                .with_property(PropertyDescriptor::scalar("placed", ScalarType::Date))
                .with_property(PropertyDescriptor::scalar("status", ScalarType::String))
                .with_property(PropertyDescriptor::scalar("archived", ScalarType::Bool))
                .with_property(PropertyDescriptor::reference("customer", "Customer"))
                .with_property(PropertyDescriptor::one_to_many("lines", "Line", "order").owned()),
        )
        .with_entity(
            EntityDef::new("Line")
                .with_property(PropertyDescriptor::reference("order", "Order"))
                .with_property(PropertyDescriptor::scalar("qty", ScalarType::Int64)),
        )
        .with_entity(
            EntityDef::new("Customer")
                .with_property(PropertyDescriptor::scalar("name", ScalarType::String))
                .with_property(PropertyDescriptor::reference("address", "Address")),
        )
        .with_entity(
            EntityDef::new("Address").with_property(PropertyDescriptor::scalar("city", ScalarType::String)),
        )
}

/// Two customers, three orders totalling 10, 15 and 20.
fn seed(ctx: &TestContext) -> (i64, i64, [i64; 3]) {
    let paris = ctx.insert("Address", value_map! { "city" => "Paris" });
    let acme = ctx.insert("Customer", value_map! { "name" => "Acme", "address" => paris });
    let globex = ctx.insert("Customer", value_map! { "name" => "Globex" });
    let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
    let orders = [
        ctx.insert(
            "Order",
            value_map! { "total" => 10.0, "status" => "open", "customer" => acme, "placed" => day(1) },
        ),
        ctx.insert(
            "Order",
            value_map! { "total" => 15.0, "status" => "open", "customer" => globex, "placed" => day(10) },
        ),
        ctx.insert(
            "Order",
            value_map! { "total" => 20.0, "status" => "closed", "customer" => acme },
        ),
    ];
    (acme, globex, orders)
}

#[test]
fn test_join_idempotence() {
    let ctx = TestContext::new();
    let resolver = PathResolver::new(ctx.registry(), "Order").unwrap();
    let mut plan = JoinPlan::new();

    let first = resolver.resolve("customer.address.city", &mut plan).unwrap();
    let again = resolver.resolve("customer.address.city", &mut plan).unwrap();
    let sibling = resolver.resolve("customer.name", &mut plan).unwrap();
    assert_eq!(first.expression, again.expression);
    assert_eq!(plan.len(), 2);
    assert_eq!(sibling.expression, "_customer.name");

    let compiled = ctx
        .query("Order")
        .filter("self.customer.name = ? OR self.customer.name = ?", vec!["a".into(), "b".into()])
        .order("customer.name")
        .unwrap()
        .compile_select()
        .unwrap();
    assert_eq!(compiled.joins.len(), 1);
}

#[test]
fn test_filter_through_references() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);

    let query = ctx
        .query("Order")
        .filter("self.customer.address.city = ?", vec!["Paris".into()]);
    assert_eq!(ctx.ids(&query), vec![orders[0], orders[2]]);

    let query = ctx
        .query("Order")
        .filter("self.customer.name LIKE ? AND self.total > ?", vec!["%lob%".into(), 12.into()]);
    assert_eq!(ctx.ids(&query), vec![orders[1]]);
}

#[test]
fn test_between_boundaries() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);

    let exclusive = ctx
        .query("Order")
        .criteria(&Criterion::range("total", "between", 10, 20));
    assert_eq!(ctx.ids(&exclusive), vec![orders[1]]);

    let inclusive = ctx
        .query("Order")
        .criteria(&Criterion::range("total", "betweenInclusive", 10, 20));
    assert_eq!(ctx.ids(&inclusive), orders.to_vec());

    let outside = ctx
        .query("Order")
        .criteria(&Criterion::range("total", "notBetween", 10, 20));
    assert_eq!(ctx.ids(&outside), vec![orders[0], orders[2]]);
}

#[test]
fn test_criteria_tree_and_archived_rows() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);
    let archived = ctx.insert("Order", value_map! { "total" => 99.0, "status" => "open", "archived" => true });

    let criteria = Criterion::and(vec![
        Criterion::leaf("status", "=", "open"),
        Criterion::or(vec![
            Criterion::leaf("customer", "like", "acm"),
            Criterion::leaf("total", ">=", 50),
        ]),
    ]);
    let query = ctx.query("Order").criteria(&criteria);
    assert_eq!(ctx.ids(&query), vec![orders[0]]);

    let with_archived = ctx.query("Order").criteria(&criteria.clone().with_archived(true));
    assert_eq!(ctx.ids(&with_archived), vec![orders[0], archived]);
}

#[test]
fn test_domain_clauses_with_context() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);

    let either = Criterion::default()
        .with_extra_domain("self.total >= :high", value_map! { "high" => 20 })
        .with_extra_domain("self.customer.name = :who", value_map! { "who" => "Globex" });
    assert_eq!(ctx.ids(&ctx.query("Order").criteria(&either)), vec![orders[1], orders[2]]);

    let both = Criterion::leaf("status", "=", "open").with_domain("self.total < :cap", ValueMap::new());
    let query = ctx.query("Order").criteria(&both).bind("cap", 12).unwrap();
    assert_eq!(ctx.ids(&query), vec![orders[0]]);
}

#[test]
fn test_ordering_puts_nulls_first() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);

    let by_date = ctx.query("Order").order("placed").unwrap();
    assert_eq!(ctx.ids(&by_date), vec![orders[2], orders[0], orders[1]]);

    let by_customer = ctx
        .query("Order")
        .order("-customer.name")
        .unwrap()
        .order("-total")
        .unwrap();
    assert_eq!(ctx.ids(&by_customer), vec![orders[1], orders[2], orders[0]]);

    let page = by_customer.fetch(&ctx.engine, 1, 1).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, orders[2]);
}

#[test]
fn test_projection_rows() {
    let ctx = TestContext::new();
    let (acme, _, orders) = seed(&ctx);
    let line_a = ctx.insert("Line", value_map! { "order" => orders[0], "qty" => 1 });
    let line_b = ctx.insert("Line", value_map! { "order" => orders[0], "qty" => 2 });

    let result = ctx
        .query("Order")
        .filter("self.id = ?", vec![orders[0].into()])
        .select(&["customer", "total", "lines", "customer.address.city", "nope"])
        .fetch_rows(&ctx.engine, Pagination::new(10, 0))
        .unwrap();

    assert_eq!(result.total, Some(1));
    let row = &result.rows[0];
    assert_eq!(row["id"], Value::Int(orders[0]));
    assert_eq!(row["version"], Value::Int(0));
    assert_eq!(
        row["customer"],
        Value::Map(compact_reference(Value::Int(acme), Value::Int(0), Some(("name", "Acme".into()))))
    );
    assert_eq!(row["customer.address.city"], Value::from("Paris"));
    assert_eq!(
        row["lines"],
        Value::List(vec![
            Value::Map(compact_reference(Value::Int(line_a), Value::Int(0), None)),
            Value::Map(compact_reference(Value::Int(line_b), Value::Int(0), None)),
        ])
    );
    assert!(!row.contains_key("nope"));
}

#[test]
fn test_projection_without_fields_has_id_and_version() {
    let ctx = TestContext::new();
    seed(&ctx);
    let result = ctx
        .query("Order")
        .fetch_rows(&ctx.engine, Pagination::new(2, 0))
        .unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.has_more());
    for row in &result.rows {
        assert_eq!(row.keys().collect::<Vec<_>>(), vec!["id", "version"]);
    }
}

#[test]
fn test_bulk_update_touches_only_changed_rows() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);

    let query = ctx.query("Order").filter("self.total > ?", vec![12.into()]);
    assert_eq!(query.update(&ctx.engine, &value_map! { "status" => "closed" }).unwrap(), 1);
    assert_eq!(query.update(&ctx.engine, &value_map! { "status" => "closed" }).unwrap(), 0);

    let versions: Vec<i64> = orders
        .iter()
        .map(|id| ctx.engine.current_version("Order", *id).unwrap().unwrap())
        .collect();
    assert_eq!(versions, vec![0, 1, 0]);

    assert_eq!(query.update(&ctx.engine, &value_map! { "placed" => Value::Null }).unwrap(), 1);
    let cleared = ctx.engine.get("Order", orders[1]).unwrap().unwrap();
    assert_eq!(cleared.get("placed"), Value::Null);
    assert_eq!(cleared.version, 2);
}

#[test]
fn test_bulk_delete_through_a_join() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);

    let deleted = ctx
        .query("Order")
        .filter("self.customer.name = ?", vec!["Acme".into()])
        .delete(&ctx.engine)
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(ctx.ids(&ctx.query("Order")), vec![orders[1]]);
}

#[test]
fn test_count_and_fetch_one() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);
    let open = ctx.query("Order").filter("self.status = :status", vec![]).bind("status", "open").unwrap();
    assert_eq!(open.count(&ctx.engine).unwrap(), 2);
    assert_eq!(open.fetch_one(&ctx.engine).unwrap().map(|r| r.id), Some(orders[0]));
}

#[test]
fn test_implicit_date_variable() {
    let ctx = TestContext::new();
    let (_, _, orders) = seed(&ctx);
    let now = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_hms_opt(9, 0, 0).unwrap();
    let query = ctx.query("Order").at(now).filter("self.placed < :__date__", vec![]);
    assert_eq!(ctx.ids(&query), vec![orders[0]]);
}

#[test]
fn test_best_effort_search() {
    let ctx = TestContext::new();
    seed(&ctx);
    let search = value_map! { "nope" => "x" };

    let strict = ctx.query("Order").search(&search);
    assert!(matches!(strict.fetch(&ctx.engine, 0, 0), Err(Error::Resolution(_))));

    let config = QueryConfig {
        best_effort_search: true,
        default_limit: 2,
    };
    let lenient = ctx.query("Order").with_config(config).search(&search);
    assert_eq!(lenient.fetch(&ctx.engine, 0, 0).unwrap().len(), 2);
}
