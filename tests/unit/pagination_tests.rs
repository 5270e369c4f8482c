// Pagination invariants over the public API

use serde_json::{json, Value};
use warren::pagination::{json_str, paginate, Page, PageRequest};

#[test]
fn test_pages_partition_the_collection() {
    for total in [0usize, 1, 4, 5, 6, 12, 99] {
        for page_size in [1usize, 3, 5, 10] {
            let items: Vec<usize> = (0..total).collect();
            let first = Page::from_items(items.clone(), 1, page_size);
            let expected_pages = total.div_ceil(page_size);
            assert_eq!(first.total_pages, expected_pages, "total {} size {}", total, page_size);

            let mut seen = Vec::new();
            for page in 1..=expected_pages {
                let p = Page::from_items(items.clone(), page, page_size);
                assert!(p.items.len() <= page_size);
                assert_eq!(p.has_previous, page > 1);
                assert_eq!(p.has_next, page < expected_pages);
                seen.extend(p.items);
            }
            assert_eq!(seen, items);
        }
    }
}

fn queues(names: &[&str]) -> Vec<Value> {
    names.iter().map(|n| json!({ "name": n })).collect()
}

#[test]
fn test_filter_applies_before_slicing() {
    let items = queues(&["a1", "b1", "a2", "b2", "a3", "b3", "a4"]);
    let request = PageRequest::new(2, 2).with_name("a", false);

    let page = paginate(items, &request, |q| json_str(q, "name")).unwrap();

    assert_eq!(page.total_items, 4);
    assert_eq!(page.total_pages, 2);
    let names: Vec<&str> = page.items.iter().filter_map(|q| json_str(q, "name")).collect();
    assert_eq!(names, vec!["a3", "a4"]);
}

#[test]
fn test_items_without_the_field_never_match_a_filter() {
    let items = vec![json!({"name": "orders"}), json!({"vhost": "/"})];

    let unfiltered = paginate(items.clone(), &PageRequest::new(1, 10), |q| json_str(q, "name"))
        .unwrap();
    assert_eq!(unfiltered.total_items, 2);

    let filtered = paginate(
        items,
        &PageRequest::new(1, 10).with_name("", true),
        |q| json_str(q, "name"),
    )
    .unwrap();
    assert_eq!(filtered.total_items, 1);
}

#[test]
fn test_invalid_regex_is_a_validation_error() {
    let request = PageRequest::new(1, 10).with_name("orders(", true);
    let err = paginate(queues(&["orders"]), &request, |q| json_str(q, "name")).unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(err.kind(), "validation");
}

#[test]
fn test_page_serializes_with_snake_case_fields() {
    let page = Page::from_items(vec![1, 2, 3], 1, 2);
    let value = serde_json::to_value(&page).unwrap();
    assert_eq!(value["total_items"], 3);
    assert_eq!(value["page_size"], 2);
    assert_eq!(value["has_next"], true);
    assert_eq!(value["has_previous"], false);
}
