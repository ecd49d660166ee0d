//! Criterion benchmarks for the visible-window blit.
//!
//! The viewer copies the visible window once per frame, so this is the hot
//! path of every presentation.
//!
//! Run with:
//! ```bash
//! cargo bench --package fbemu-core --bench blit_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fbemu_core::screen::copy_visible;
use fbemu_core::{DisplayMode, ScreenGeometry};

fn geometry(xres: u32, yres: u32) -> ScreenGeometry {
    ScreenGeometry::new(
        "bench",
        &DisplayMode {
            xres,
            yres,
            xres_virtual: xres,
            yres_virtual: yres * 2,
            bits_per_pixel: 32,
        },
    )
    .expect("bench geometry must be valid")
}

/// One frame at common panel sizes, showing the second page.
fn bench_copy_visible(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy_visible");
    for (name, xres, yres) in [("480x800", 480, 800), ("800x480", 800, 480), ("1280x720", 1280, 720)] {
        let mut g = geometry(xres, yres);
        g.pan(0, yres).expect("second page fits");
        let src = vec![0x00FF_00FFu32; g.pixel_capacity() as usize];
        let mut dst = vec![0u32; (xres * yres) as usize];
        group.bench_with_input(BenchmarkId::new("frame", name), &g, |b, g| {
            b.iter(|| copy_visible(black_box(&src), black_box(g), &mut dst))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_copy_visible);
criterion_main!(benches);
