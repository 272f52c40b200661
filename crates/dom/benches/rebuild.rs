use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ward_dom::{parse_fragment, DomArena};

fn rebuild_cycles(c: &mut Criterion) {
    c.bench_function("append_then_remove_children_50", |b| {
        let mut arena = DomArena::new();
        let root = arena.create_element("div").unwrap();
        let doc = arena.document();
        arena.append_child(doc, root).unwrap();

        b.iter(|| {
            for _ in 0..50 {
                let p = arena.create_element("p").unwrap();
                arena.append_child(root, p).unwrap();
            }
            black_box(arena.remove_children(root).unwrap());
        });
    });

    c.bench_function("parse_fragment_chapter", |b| {
        let html = "<div class=\"chapter\"><h1>Chapter 1</h1>".to_string()
            + &"<p>Lorem ipsum <em>dolor</em> sit amet &amp; more.</p>".repeat(40)
            + "</div>";
        let mut arena = DomArena::new();
        let root = arena.create_element("div").unwrap();

        b.iter(|| {
            parse_fragment(&mut arena, root, black_box(&html)).unwrap();
            arena.remove_children(root).unwrap();
        });
    });
}

criterion_group!(benches, rebuild_cycles);
criterion_main!(benches);
