//! Property-based tests for predicate rendering and column lookups
//!
//! These tests verify that:
//! - Column predicates select exactly the rows equal on every key
//! - Rendered predicates bind one parameter per non-null value
//! - Quoted identifiers survive arbitrary names

#[cfg(test)]
mod tests {
    use dbclient::{Client, ColumnMap, Driver, Predicate, Value};
    use proptest::prelude::*;

    const LABELS: [&str; 3] = ["alpha", "beta", "gamma"];

    type Item = (i64, bool, &'static str);

    fn arb_items() -> impl Strategy<Value = Vec<Item>> {
        prop::collection::vec((0i64..4, any::<bool>(), prop::sample::select(LABELS.to_vec())), 0..20)
    }

    fn arb_filter() -> impl Strategy<Value = (Option<i64>, Option<bool>, Option<&'static str>)> {
        (
            prop::option::of(0i64..4),
            prop::option::of(any::<bool>()),
            prop::option::of(prop::sample::select(LABELS.to_vec())),
        )
    }

    fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-zA-Z_\" ]{1,12}".prop_map(|s: String| s)
    }

    fn client_with(items: &[Item]) -> Client {
        let mut client = Client::in_memory();
        client
            .run_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, category INTEGER, flag INTEGER, label TEXT)")
            .unwrap();
        for (category, flag, label) in items {
            let mut row = ColumnMap::new();
            row.insert("category".into(), Value::from(*category));
            row.insert("flag".into(), Value::from(*flag));
            row.insert("label".into(), Value::from(*label));
            client.insert("items", &row).unwrap();
        }
        client
    }

    proptest! {
        /// Rows returned by a column predicate are exactly the rows equal on every key
        #[test]
        fn prop_find_by_columns_matches_equality(items in arb_items(), filter in arb_filter()) {
            let mut client = client_with(&items);
            let (category, flag, label) = filter;

            let mut columns = ColumnMap::new();
            if let Some(c) = category { columns.insert("category".into(), Value::from(c)); }
            if let Some(f) = flag { columns.insert("flag".into(), Value::from(f)); }
            if let Some(l) = label { columns.insert("label".into(), Value::from(l)); }

            let expected = items.iter().filter(|(c, f, l)| {
                category.map_or(true, |v| v == *c)
                    && flag.map_or(true, |v| v == *f)
                    && label.map_or(true, |v| v == *l)
            }).count();

            let rows = client.find_all_by_columns("items", &Predicate::Columns(columns.clone()), None).unwrap();
            prop_assert_eq!(rows.len(), expected);
            for row in &rows {
                for (column, value) in &columns {
                    prop_assert_eq!(row.get(column), Some(value));
                }
            }
        }

        /// Rendering binds one parameter per non-null value and joins with AND
        #[test]
        fn prop_rendered_predicate_shape(values in prop::collection::btree_map("[a-z]{1,8}", prop::option::of(any::<i64>()), 1..6)) {
            let columns: ColumnMap = values
                .iter()
                .map(|(k, v)| (k.clone(), v.map(Value::Integer).unwrap_or(Value::Null)))
                .collect();
            let (sql, params) = Predicate::Columns(columns).render(Driver::Sqlite).unwrap().unwrap();

            prop_assert_eq!(params.len(), values.values().filter(|v| v.is_some()).count());
            prop_assert_eq!(sql.matches(" AND ").count(), values.len() - 1);
            prop_assert_eq!(sql.matches("IS NULL").count(), values.values().filter(|v| v.is_none()).count());
        }

        /// Any identifier quoted by the driver can name a real column
        #[test]
        fn prop_quoted_identifiers_are_usable(name in arb_identifier()) {
            prop_assume!(!name.eq_ignore_ascii_case("id"));
            let mut client = Client::in_memory();
            let quoted = Driver::Sqlite.quote_identifier(&name);
            client.run_batch(&format!("CREATE TABLE t (id INTEGER PRIMARY KEY, {} TEXT)", quoted)).unwrap();

            let mut row = ColumnMap::new();
            row.insert(name.clone(), Value::from("x"));
            client.insert("t", &row).unwrap();
            prop_assert_eq!(client.count("t", Some(&Predicate::eq(name.as_str(), "x"))).unwrap(), 1);
        }
    }

    #[test]
    fn test_empty_predicate_matches_all() {
        let mut client = client_with(&[(1, true, "alpha"), (2, false, "beta")]);
        assert_eq!(client.find_all_by_columns("items", &Predicate::all(), None).unwrap().len(), 2);
    }
}
