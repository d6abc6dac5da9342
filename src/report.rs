//! HTML report of a workflow run.
//!
//! The report is a single self-contained page; figures are referenced by
//! file name and must sit next to it in `output_dir`.

use crate::casi::CasiReport;
use crate::error::Result;
use crate::extreme::{ExtremeBounds, PredictionScale};
use crate::model::QuantileFit;
use crate::pipeline::{SiteModel, WorkflowConfig};
use crate::profile::DistributionProfile;
use crate::test::FixedEffectTable;
use std::fs;
use std::path::{Path, PathBuf};

/// HTML report generator
pub struct HtmlReport<'a> {
    pub config: &'a WorkflowConfig,
    pub report: &'a CasiReport,
    pub profile: &'a DistributionProfile,
    pub bounds: &'a ExtremeBounds,
    pub site_model: &'a SiteModel,
    pub figures: &'a [PathBuf],
}

impl HtmlReport<'_> {
    /// Render and write the report.
    pub fn generate(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        log::info!("Wrote report to {}", path.display());
        Ok(())
    }

    /// Render the full page.
    pub fn render(&self) -> String {
        let mut html = String::new();

        html.push_str(&html_header());
        html.push_str(&summary_section(self.report, self.profile, self.bounds));
        html.push_str(&profile_section(self.profile));
        html.push_str(&bounds_section(self.bounds, self.config.quantiles));
        html.push_str(&site_model_section(self.site_model));
        html.push_str(&figures_section(self.figures));
        html.push_str(&html_footer());

        html
    }
}

/// Escape text for HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn html_header() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>CASI Workflow Report</title>
    <style>
        :root {
            --primary: #2563eb;
            --dark: #1e293b;
            --light: #f8fafc;
            --border: #e2e8f0;
        }
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            line-height: 1.6;
            color: var(--dark);
            background: var(--light);
        }
        .container { max-width: 1200px; margin: 0 auto; padding: 40px 20px; }
        .header {
            text-align: center;
            margin-bottom: 40px;
            padding-bottom: 20px;
            border-bottom: 3px solid var(--primary);
        }
        .header h1 { font-size: 32px; margin-bottom: 10px; }
        .section {
            background: white;
            border-radius: 8px;
            padding: 24px;
            margin-bottom: 24px;
            border: 1px solid var(--border);
        }
        .section h2 {
            font-size: 22px;
            margin-bottom: 16px;
            padding-bottom: 8px;
            border-bottom: 2px solid var(--primary);
        }
        .stats-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(180px, 1fr));
            gap: 16px;
        }
        .stat-card { padding: 16px; border: 1px solid var(--border); border-radius: 6px; }
        .stat-card .value { font-size: 24px; font-weight: 600; }
        .stat-card .label { color: #64748b; }
        table { width: 100%; border-collapse: collapse; margin: 12px 0; }
        th, td { padding: 6px 10px; border-bottom: 1px solid var(--border); text-align: right; }
        th:first-child, td:first-child { text-align: left; }
        .note { color: #64748b; font-size: 14px; }
        figure { margin: 16px 0; }
        figure img { max-width: 100%; border: 1px solid var(--border); }
        .footer { text-align: center; color: #64748b; font-size: 14px; margin-top: 40px; }
    </style>
</head>
<body>
<div class="container">
    <div class="header">
        <h1>Compositional Aggregate Stability Index</h1>
        <p>Laser-diffraction particle-size workflow</p>
    </div>
"#
    .to_string()
}

fn stat_card(value: &str, label: &str) -> String {
    format!(
        r#"        <div class="stat-card"><div class="value">{}</div><div class="label">{}</div></div>
"#,
        escape(value),
        escape(label)
    )
}

fn summary_section(report: &CasiReport, profile: &DistributionProfile, bounds: &ExtremeBounds) -> String {
    let mut html = String::from(
        r#"
    <div class="section">
        <h2>Summary</h2>
        <div class="stats-grid">
"#,
    );
    html.push_str(&stat_card(&profile.n_rows.to_string(), "rows analysed"));
    html.push_str(&stat_card(&profile.n_sites.to_string(), "sites"));
    html.push_str(&stat_card(&profile.n_profiles.to_string(), "profiles"));
    html.push_str(&stat_card(&profile.n_ssids.to_string(), "samples (ssid)"));
    html.push_str(&stat_card(&bounds.n_extreme().to_string(), "extreme rows"));
    html.push_str("        </div>\n");

    if report.n_without_reference > 0 {
        html.push_str(&format!(
            r#"        <p class="note">Dropped {} rows without a reference measurement: {}</p>
"#,
            report.n_without_reference,
            escape(&report.ssids_without_reference.join(", "))
        ));
    }
    if report.n_without_covariates > 0 {
        html.push_str(&format!(
            r#"        <p class="note">Dropped {} rows without covariates: {}</p>
"#,
            report.n_without_covariates,
            escape(&report.ssids_without_covariates.join(", "))
        ));
    }

    html.push_str("    </div>\n");
    html
}

fn profile_section(profile: &DistributionProfile) -> String {
    let mut html = String::from(
        r#"
    <div class="section">
        <h2>CASI distribution</h2>
        <table>
            <thead>
                <tr><th>Dispersion</th><th>Sonication</th><th>n</th><th>Min</th><th>Q1</th><th>Median</th><th>Q3</th><th>Max</th><th>Mean</th></tr>
            </thead>
            <tbody>
"#,
    );

    for g in &profile.groups {
        let s = &g.casi;
        html.push_str(&format!(
            "                <tr><td>{}</td><td>{}</td><td>{}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td></tr>\n",
            escape(&g.disp),
            crate::data::format_number(g.stime),
            s.n,
            s.min,
            s.q1,
            s.median,
            s.q3,
            s.max,
            s.mean
        ));
    }
    let s = &profile.casi;
    html.push_str(&format!(
        "                <tr><td><strong>All</strong></td><td></td><td>{}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td></tr>\n",
        s.n, s.min, s.q1, s.median, s.q3, s.max, s.mean
    ));

    html.push_str("            </tbody>\n        </table>\n    </div>\n");
    html
}

fn quantile_rows(fit: &QuantileFit) -> String {
    fit.coefficient_names
        .iter()
        .zip(&fit.coefficients)
        .map(|(name, coef)| {
            format!(
                "                <tr><td>{}</td><td>{:.3}</td><td>{:.4}</td></tr>\n",
                escape(name),
                fit.tau,
                coef
            )
        })
        .collect()
}

fn bounds_section(bounds: &ExtremeBounds, quantiles: [f64; 2]) -> String {
    let scale = match bounds.scale {
        PredictionScale::Exponentiated => "exponentiated linear predictor",
        PredictionScale::Linear => "linear predictor",
    };
    let mut html = format!(
        r#"
    <div class="section">
        <h2>Extreme values</h2>
        <p>Quantile regression <code>{}</code> at &tau; = {} and {}; bounds on the {} scale.
        {} of {} rows fall strictly outside the bounds.</p>
        <table>
            <thead>
                <tr><th>Coefficient</th><th>&tau;</th><th>Estimate</th></tr>
            </thead>
            <tbody>
"#,
        escape(&bounds.model),
        quantiles[0],
        quantiles[1],
        scale,
        bounds.n_extreme(),
        bounds.labels.len()
    );
    html.push_str(&quantile_rows(&bounds.lower));
    html.push_str(&quantile_rows(&bounds.upper));
    html.push_str("            </tbody>\n        </table>\n    </div>\n");
    html
}

fn fixed_effects_table(table: &FixedEffectTable) -> String {
    let mut html = String::from(
        r#"        <table>
            <thead>
                <tr><th>Term</th><th>Estimate</th><th>Std. error</th><th>df</th><th>t</th><th>p</th><th></th></tr>
            </thead>
            <tbody>
"#,
    );
    for row in &table.rows {
        html.push_str(&format!(
            "                <tr><td>{}</td><td>{:.4}</td><td>{:.4}</td><td>{:.0}</td><td>{:.3}</td><td>{:.3e}</td><td>{}</td></tr>\n",
            escape(&row.coefficient),
            row.estimate,
            row.std_error,
            row.df,
            row.statistic,
            row.p_value,
            row.significance
        ));
    }
    html.push_str("            </tbody>\n        </table>\n");
    html.push_str(
        r#"        <p class="note">Signif. codes: 0 '***' 0.001 '**' 0.01 '*' 0.05 '.' 0.1 ' ' 1</p>
"#,
    );
    html
}

fn site_model_section(model: &SiteModel) -> String {
    let mut html = format!(
        r#"
    <div class="section">
        <h2>Multilevel model</h2>
        <p><code>{}</code>, n = {}, REML criterion {:.3} after {} iterations.</p>
"#,
        escape(&model.model),
        model.n_obs,
        model.reml_criterion,
        model.iterations
    );
    html.push_str(&fixed_effects_table(&model.fixed_effects));

    html.push_str(
        r#"        <table>
            <thead>
                <tr><th>Group</th><th>Groups</th><th>Variance</th><th>Std. dev.</th></tr>
            </thead>
            <tbody>
"#,
    );
    for vc in &model.variance_components {
        html.push_str(&format!(
            "                <tr><td>{}</td><td>{}</td><td>{:.4}</td><td>{:.4}</td></tr>\n",
            escape(&vc.group),
            vc.n_groups,
            vc.variance,
            vc.variance.sqrt()
        ));
    }
    html.push_str(&format!(
        "                <tr><td>Residual</td><td></td><td>{:.4}</td><td>{:.4}</td></tr>\n",
        model.residual_variance,
        model.residual_variance.sqrt()
    ));
    html.push_str("            </tbody>\n        </table>\n    </div>\n");
    html
}

fn figures_section(figures: &[PathBuf]) -> String {
    let mut html = String::from(
        r#"
    <div class="section">
        <h2>Figures</h2>
"#,
    );
    if figures.is_empty() {
        html.push_str(r#"        <p class="note">No figures were rendered.</p>
"#);
    }
    for path in figures {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = escape(&name);
        html.push_str(&format!(
            r#"        <figure><img src="{}" alt="{}"><figcaption>{}</figcaption></figure>
"#,
            name, name, name
        ));
    }
    html.push_str("    </div>\n");
    html
}

fn html_footer() -> String {
    format!(
        r#"
    <div class="footer">
        <p>Generated by <strong>ldpsa-casi</strong> {}</p>
    </div>
</div>
</body>
</html>
"#,
        env!("CARGO_PKG_VERSION")
    )
}
