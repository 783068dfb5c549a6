use criterion::{black_box, criterion_group, criterion_main, Criterion};

use a2utils_config::{parse, query, ConfigTree};

fn site(n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        out.push_str(&format!(
            "<VirtualHost *:80>\n    ServerName site{i}.example.com\n    ServerAlias www.site{i}.example.com\n    DocumentRoot /var/www/virtual/site{i}\n    <Directory /var/www/virtual/site{i}>\n        AllowOverride All\n        Require all granted\n    </Directory>\n</VirtualHost>\n\n"
        ));
    }
    out
}

fn bench_parse(c: &mut Criterion) {
    let source = site(200);
    c.bench_function("parse 200 vhosts", |b| b.iter(|| parse(black_box(&source))));
}

fn bench_vhosts(c: &mut Criterion) {
    let source = site(200);
    let tree = ConfigTree::from_source("/etc/apache2/sites-enabled/bench.conf", &source)
        .expect("bench config parses");
    c.bench_function("extract vhosts", |b| b.iter(|| black_box(&tree).vhosts()));
    c.bench_function("find vhost by name", |b| {
        b.iter(|| black_box(&tree).find_vhosts("www.site150.example.com", Some(80)))
    });

    let vhosts = tree.vhosts();
    c.bench_function("format vhosts", |b| {
        b.iter(|| {
            vhosts
                .iter()
                .map(|v| query::format_vhost("{servername} {documentroot}", v))
                .collect::<Vec<_>>()
        })
    });
}

criterion_group!(benches, bench_parse, bench_vhosts);
criterion_main!(benches);
