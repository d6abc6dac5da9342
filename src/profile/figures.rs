//! Figure generation using plotters (SVG output)
//!
//! Uses the SVG backend to avoid system font dependencies.

use crate::casi::CasiTable;
use crate::data::format_number;
use crate::error::{CasiError, Result};
use crate::model::RandomIntercept;
use crate::profile::distribution::BoxStats;
use plotters::prelude::*;
use plotters_svg::SVGBackend;
use std::ops::Range;
use std::path::Path;

type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Colouring of the ternary scatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernaryColour {
    /// One colour per sonication time.
    SonicationTime,
    /// Continuous blue to red gradient over CASI.
    Casi,
}

fn finish(path: &Path, result: DrawResult) -> Result<()> {
    result.map_err(|e| CasiError::Figure(format!("{}: {}", path.display(), e)))
}

fn extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
            (min.min(v), max.max(v))
        })
}

fn padded(min: f64, max: f64) -> Range<f64> {
    if !(min.is_finite() && max.is_finite()) {
        return 0.0..1.0;
    }
    let span = max - min;
    let pad = if span > 0.0 {
        span * 0.05
    } else {
        min.abs().max(1.0) * 0.05
    };
    (min - pad)..(max + pad)
}

/// Blue (t = 0) to red (t = 1).
fn gradient_color(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
    RGBColor(
        (40.0 + 215.0 * t) as u8,
        (60.0 + 80.0 * (1.0 - (2.0 * t - 1.0).abs())) as u8,
        (255.0 - 215.0 * t) as u8,
    )
}

fn draw_empty(path: &Path, message: &str) -> DrawResult {
    let root = SVGBackend::new(path, (800, 500)).into_drawing_area();
    root.fill(&WHITE)?;
    root.draw(&Text::new(
        message.to_string(),
        (300, 250),
        ("sans-serif", 20).into_font().color(&BLACK),
    ))?;
    root.present()?;
    Ok(())
}

/// Map of sample locations, labelled by site.
pub fn site_map(path: &Path, table: &CasiTable) -> Result<()> {
    finish(path, draw_site_map(path, table))
}

fn draw_site_map(path: &Path, table: &CasiTable) -> DrawResult {
    let mut points: Vec<(f64, f64, &str)> = Vec::new();
    for r in table.iter() {
        let (lon, lat) = (r.sample.lon, r.sample.lat);
        if !points.iter().any(|p| p.0 == lon && p.1 == lat) {
            points.push((lon, lat, r.sample.site.as_str()));
        }
    }
    if points.is_empty() {
        return draw_empty(path, "No sample locations");
    }

    let (min_lon, max_lon) = extent(points.iter().map(|p| p.0));
    let (min_lat, max_lat) = extent(points.iter().map(|p| p.1));

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Sample locations", ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(padded(min_lon, max_lon), padded(min_lat, max_lat))?;

    chart
        .configure_mesh()
        .x_desc("Longitude")
        .y_desc("Latitude")
        .draw()?;

    chart.draw_series(
        points
            .iter()
            .map(|(x, y, _)| Circle::new((*x, *y), 4, BLUE.filled())),
    )?;

    let mut labelled: Vec<&str> = Vec::new();
    for (x, y, site) in &points {
        if labelled.contains(site) {
            continue;
        }
        labelled.push(*site);
        chart.draw_series(std::iter::once(Text::new(
            site.to_string(),
            (*x, *y),
            ("sans-serif", 12).into_font().color(&BLACK),
        )))?;
    }

    root.present()?;
    Ok(())
}

const TRIANGLE_HEIGHT: f64 = 0.866_025_403_784_438_6;

/// Planar position of a closed (sand, silt, clay) composition: sand at the
/// lower left corner, silt at the lower right, clay at the top.
pub fn ternary_xy(closed: &[f64; 3]) -> (f64, f64) {
    let silt = closed[1];
    let clay = closed[2];
    (silt + 0.5 * clay, clay * TRIANGLE_HEIGHT)
}

/// Colour bar segments and placement, in ternary chart coordinates.
const COLOUR_BAR_STEPS: usize = 20;
const COLOUR_BAR_X: Range<f64> = 0.92..0.97;
const COLOUR_BAR_Y: Range<f64> = 0.45..0.85;

/// Ternary scatter of the closed fractions.
///
/// The CASI colouring carries a vertical colour bar labelled with the
/// smallest and largest CASI of `table`.
pub fn ternary(path: &Path, table: &CasiTable, colour: TernaryColour, title: &str) -> Result<()> {
    finish(path, draw_ternary(path, table, colour, title))
}

fn draw_ternary(path: &Path, table: &CasiTable, colour: TernaryColour, title: &str) -> DrawResult {
    if table.is_empty() {
        return draw_empty(path, "No samples");
    }

    let root = SVGBackend::new(path, (700, 650)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 18))
        .margin(20)
        .build_cartesian_2d(-0.1..1.1, -0.1..1.0)?;

    // Guides every 20 %
    let grey = RGBColor(210, 210, 210);
    for step in 1..5 {
        let t = step as f64 * 0.2;
        let guides = [
            ([1.0 - t, 0.0, t], [0.0, 1.0 - t, t]),
            ([t, 1.0 - t, 0.0], [t, 0.0, 1.0 - t]),
            ([1.0 - t, t, 0.0], [0.0, t, 1.0 - t]),
        ];
        for (a, b) in guides.iter() {
            chart.draw_series(LineSeries::new(vec![ternary_xy(a), ternary_xy(b)], &grey))?;
        }
    }

    chart.draw_series(LineSeries::new(
        vec![(0.0, 0.0), (1.0, 0.0), (0.5, TRIANGLE_HEIGHT), (0.0, 0.0)],
        &BLACK,
    ))?;

    let label_font = ("sans-serif", 14).into_font().color(&BLACK);
    for (label, at) in [
        ("Sand", (-0.08, -0.04)),
        ("Silt", (1.0, -0.04)),
        ("Clay", (0.47, TRIANGLE_HEIGHT + 0.05)),
    ] {
        chart.draw_series(std::iter::once(Text::new(label, at, label_font.clone())))?;
    }

    match colour {
        TernaryColour::SonicationTime => {
            let mut stimes: Vec<f64> = Vec::new();
            for r in table.iter() {
                if !stimes.contains(&r.sample.stime) {
                    stimes.push(r.sample.stime);
                }
            }
            stimes.sort_by(|a, b| a.total_cmp(b));

            for (i, stime) in stimes.iter().enumerate() {
                let color = Palette99::pick(i).to_rgba();
                chart
                    .draw_series(
                        table
                            .iter()
                            .filter(|r| r.sample.stime == *stime)
                            .map(|r| Circle::new(ternary_xy(&r.closed), 3, color.filled())),
                    )?
                    .label(format!("stime {}", format_number(*stime)))
                    .legend(move |(x, y)| Circle::new((x, y), 3, color.filled()));
            }

            chart
                .configure_series_labels()
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()?;
        }
        TernaryColour::Casi => {
            let (min_casi, max_casi) = extent(table.iter().map(|r| r.casi));
            let span = (max_casi - min_casi).max(f64::EPSILON);
            chart.draw_series(table.iter().map(|r| {
                let color = gradient_color((r.casi - min_casi) / span);
                Circle::new(ternary_xy(&r.closed), 3, color.filled())
            }))?;

            let step = (COLOUR_BAR_Y.end - COLOUR_BAR_Y.start) / COLOUR_BAR_STEPS as f64;
            chart.draw_series((0..COLOUR_BAR_STEPS).map(|k| {
                let y0 = COLOUR_BAR_Y.start + k as f64 * step;
                let t = (k as f64 + 0.5) / COLOUR_BAR_STEPS as f64;
                Rectangle::new(
                    [(COLOUR_BAR_X.start, y0), (COLOUR_BAR_X.end, y0 + step)],
                    gradient_color(t).filled(),
                )
            }))?;
            chart.draw_series(std::iter::once(Rectangle::new(
                [
                    (COLOUR_BAR_X.start, COLOUR_BAR_Y.start),
                    (COLOUR_BAR_X.end, COLOUR_BAR_Y.end),
                ],
                BLACK.stroke_width(1),
            )))?;

            let tick_font = ("sans-serif", 12).into_font().color(&BLACK);
            let label_x = COLOUR_BAR_X.end + 0.01;
            chart.draw_series([
                Text::new(
                    format!("{:.2}", min_casi),
                    (label_x, COLOUR_BAR_Y.start),
                    tick_font.clone(),
                ),
                Text::new(
                    format!("{:.2}", max_casi),
                    (label_x, COLOUR_BAR_Y.end),
                    tick_font.clone(),
                ),
                Text::new(
                    "CASI".to_string(),
                    (COLOUR_BAR_X.start, COLOUR_BAR_Y.end + 0.05),
                    tick_font,
                ),
            ])?;
        }
    }

    root.present()?;
    Ok(())
}

/// CASI boxplots by sonication time.
pub fn casi_boxplot(path: &Path, table: &CasiTable, title: &str) -> Result<()> {
    finish(path, draw_casi_boxplot(path, table, title))
}

fn draw_casi_boxplot(path: &Path, table: &CasiTable, title: &str) -> DrawResult {
    let mut stimes: Vec<f64> = Vec::new();
    for r in table.iter() {
        if !stimes.contains(&r.sample.stime) {
            stimes.push(r.sample.stime);
        }
    }
    stimes.sort_by(|a, b| a.total_cmp(b));

    let boxes: Vec<(f64, BoxStats)> = stimes
        .iter()
        .filter_map(|&stime| {
            let values: Vec<f64> = table
                .iter()
                .filter(|r| r.sample.stime == stime)
                .map(|r| r.casi)
                .collect();
            BoxStats::of(&values).map(|b| (stime, b))
        })
        .collect();

    if boxes.is_empty() {
        return draw_empty(path, "No CASI values");
    }

    let (min_y, max_y) = extent(table.iter().map(|r| r.casi));
    let n = boxes.len();

    let root = SVGBackend::new(path, (800, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5..(n as f64 - 0.5), padded(min_y, max_y))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n + 1)
        .x_label_formatter(&|x| {
            let idx = x.round();
            if (x - idx).abs() < 1e-6 && idx >= 0.0 && (idx as usize) < boxes.len() {
                format_number(boxes[idx as usize].0)
            } else {
                String::new()
            }
        })
        .x_desc("Sonication time")
        .y_desc("CASI")
        .draw()?;

    for (i, (_, b)) in boxes.iter().enumerate() {
        let x = i as f64;
        let fill = Palette99::pick(i).to_rgba().mix(0.4);

        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.3, b.q1), (x + 0.3, b.q3)],
            fill.filled(),
        )))?;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(x - 0.3, b.q1), (x + 0.3, b.q3)],
            ShapeStyle::from(&BLACK),
        )))?;
        chart.draw_series(vec![
            PathElement::new(vec![(x - 0.3, b.median), (x + 0.3, b.median)], BLACK.stroke_width(2)),
            PathElement::new(vec![(x, b.q3), (x, b.upper_whisker)], BLACK.stroke_width(1)),
            PathElement::new(vec![(x, b.q1), (x, b.lower_whisker)], BLACK.stroke_width(1)),
            PathElement::new(
                vec![(x - 0.1, b.upper_whisker), (x + 0.1, b.upper_whisker)],
                BLACK.stroke_width(1),
            ),
            PathElement::new(
                vec![(x - 0.1, b.lower_whisker), (x + 0.1, b.lower_whisker)],
                BLACK.stroke_width(1),
            ),
        ])?;
        chart.draw_series(
            b.outliers
                .iter()
                .map(|&y| Circle::new((x, y), 3, BLACK.filled())),
        )?;
    }

    root.present()?;
    Ok(())
}

/// Site random intercepts with ±2 SE whiskers, ordered by site identifier.
pub fn coefficient_plot(path: &Path, effects: &[&RandomIntercept], title: &str) -> Result<()> {
    finish(path, draw_coefficient_plot(path, effects, title))
}

fn draw_coefficient_plot(path: &Path, effects: &[&RandomIntercept], title: &str) -> DrawResult {
    if effects.is_empty() {
        return draw_empty(path, "No random effects");
    }

    let mut ordered: Vec<&RandomIntercept> = effects.to_vec();
    ordered.sort_by(|a, b| a.group.cmp(&b.group));
    let n = ordered.len();

    let (min_x, max_x) = extent(
        ordered
            .iter()
            .flat_map(|e| [e.estimate - 2.0 * e.std_error, e.estimate + 2.0 * e.std_error, 0.0]),
    );

    let height = (120 + 22 * n as u32).max(300);
    let root = SVGBackend::new(path, (800, height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(100)
        .build_cartesian_2d(padded(min_x, max_x), -0.5..(n as f64 - 0.5))?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(n + 1)
        .y_label_formatter(&|y| {
            let idx = y.round();
            if (y - idx).abs() < 1e-6 && idx >= 0.0 && (idx as usize) < ordered.len() {
                ordered[idx as usize].group.clone()
            } else {
                String::new()
            }
        })
        .x_desc("Random intercept (±2 SE)")
        .draw()?;

    chart.draw_series(LineSeries::new(
        vec![(0.0, -0.5), (0.0, n as f64 - 0.5)],
        &RGBColor(150, 150, 150),
    ))?;

    chart.draw_series(ordered.iter().enumerate().map(|(i, e)| {
        let y = i as f64;
        PathElement::new(
            vec![
                (e.estimate - 2.0 * e.std_error, y),
                (e.estimate + 2.0 * e.std_error, y),
            ],
            BLUE.stroke_width(2),
        )
    }))?;
    chart.draw_series(
        ordered
            .iter()
            .enumerate()
            .map(|(i, e)| Circle::new((e.estimate, i as f64), 4, BLUE.filled())),
    )?;

    root.present()?;
    Ok(())
}
