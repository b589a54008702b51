//! Built-in archetype / region / category catalog.
//!
//! Static configuration driving case selection and prompt assembly. An
//! archetype may carry its own navigation groups; when it does, those
//! override the shared body-region list for that archetype.

use std::sync::LazyLock;

use crate::models::{Archetype, BodyRegion, Category, InterviewFrame};

fn cat(id: &str, label: &str) -> Category {
    Category {
        id: id.to_string(),
        label: label.to_string(),
        subcategories: Vec::new(),
    }
}

fn cat_with_subs(id: &str, label: &str, subcategories: Vec<Category>) -> Category {
    Category {
        id: id.to_string(),
        label: label.to_string(),
        subcategories,
    }
}

fn region(id: &str, label: &str, categories: Vec<Category>) -> BodyRegion {
    BodyRegion {
        id: id.to_string(),
        label: label.to_string(),
        categories,
    }
}

fn frame(title: &str, items: &[&str]) -> InterviewFrame {
    InterviewFrame {
        title: title.to_string(),
        items: items.iter().map(|s| s.to_string()).collect(),
    }
}

pub static ARCHETYPES: LazyLock<Vec<Archetype>> = LazyLock::new(|| {
    vec![
        Archetype {
            id: "child".to_string(),
            label: "幼小児 (Toddler/Child)".to_string(),
            description: "保護者同伴。痛みの表現が曖昧。虐待の可能性も考慮。".to_string(),
            tone: "Anxious parent answering for a child. Or a shy child.".to_string(),
            navigation_groups: vec![
                region(
                    "child_trauma",
                    "外傷 (Trauma)",
                    vec![
                        cat("clavicle_fx", "鎖骨骨折"),
                        cat("supracondylar_fx", "上腕骨顆上骨折"),
                        cat("pulled_elbow", "肘内障"),
                    ],
                ),
                region(
                    "child_congenital",
                    "先天・発育異常 (Congenital)",
                    vec![
                        cat("ddh", "発育性股関節形成不全 (DDH)"),
                        cat("torticollis", "筋性斜頸"),
                        cat("clubfoot", "内反足"),
                    ],
                ),
                region(
                    "child_growth",
                    "成長関連疾患 (Growth)",
                    vec![
                        cat("perthes", "ペルテス病"),
                        cat("scfe", "大腿骨頭すべり症 (SCFE)"),
                    ],
                ),
            ],
            interview_frames: vec![
                frame("A. 主訴と経過", &["保護者からの聴取", "数日以内"]),
                frame("B. 受傷機転・誘因", &["不明確が多い", "目を離した隙"]),
                frame("C. 痛み・症状の性質", &["表現が曖昧", "泣き止まない", "不機嫌"]),
                frame("D. 機能障害・生活影響", &["歩行拒否", "遊びの中断", "腕を使わない"]),
                frame("E. 背景因子", &["発達段階", "月齢・年齢", "家庭環境"]),
                frame("F. レッドフラッグ", &["虐待の可能性", "発育異常の兆候", "意識障害"]),
                frame("G. 患者ニーズ・ゴール", &["家族の不安解消", "整復完了", "元の生活"]),
            ],
        },
        Archetype {
            id: "growth_student".to_string(),
            label: "成長期・学生 (School Age)".to_string(),
            description: "骨端線損傷や骨端症（オスグッド等）が好発。部活動での障害も多い。"
                .to_string(),
            tone: "Active teenager, sometimes vague about pain location.".to_string(),
            navigation_groups: vec![
                region(
                    "growth_knee",
                    "膝 (Knee)",
                    vec![
                        cat("osgood", "オスグッド病"),
                        cat("jumper", "ジャンパー膝"),
                        cat("meniscus", "半月板損傷"),
                    ],
                ),
                region(
                    "growth_ankle",
                    "足部・足関節 (Foot/Ankle)",
                    vec![
                        cat("sever", "シーバー病"),
                        cat("navicular", "有痛性外脛骨"),
                        cat("ankle_sprain", "足関節捻挫"),
                    ],
                ),
                region(
                    "growth_elbow",
                    "肘 (Elbow)",
                    vec![
                        cat("baseball_elbow", "野球肘（内側障害）"),
                        cat("ocd", "離断性骨軟骨炎"),
                    ],
                ),
                region(
                    "growth_lumbar",
                    "腰 (Lumbar)",
                    vec![
                        cat("spondylolysis", "腰椎分離症"),
                        cat("spondylolisthesis", "腰椎すべり症"),
                    ],
                ),
            ],
            interview_frames: vec![
                frame("A. 主訴と経過", &["いつから痛いか", "きっかけは明確か"]),
                frame("B. 受傷機転・誘因", &["部活の内容", "練習量の変化", "ポジション変更"]),
                frame("C. 痛み・症状の性質", &["運動時痛", "練習後の痛み", "圧痛の場所"]),
                frame("D. 機能障害・生活影響", &["学業への支障", "全力で走れない", "正座困難"]),
                frame("E. 背景因子", &["成長期（身長の伸び）", "身体の硬さ", "競技レベル"]),
                frame("F. レッドフラッグ", &["夜間痛（骨腫瘍）", "発熱", "体重減少"]),
                frame("G. 患者ニーズ・ゴール", &["競技継続", "レギュラー争い", "試合出場"]),
            ],
        },
        Archetype {
            id: "athlete".to_string(),
            label: "アスリート (Athlete)".to_string(),
            description:
                "早期の競技復帰を強く希望。外傷（明確な受傷起点）に加え、オーバーユースによる障害も考慮が必要。"
                    .to_string(),
            tone: "Stoic, focused on return to play. Knows exact moment of injury.".to_string(),
            navigation_groups: vec![
                region(
                    "athlete_knee",
                    "膝 (Knee)",
                    vec![
                        cat("acl", "ACL損傷"),
                        cat("meniscus", "半月板損傷"),
                        cat("patellar_tendinitis", "膝蓋腱炎"),
                    ],
                ),
                region(
                    "athlete_ankle",
                    "足関節・足部 (Ankle/Foot)",
                    vec![
                        cat("lateral_ligament", "外側靱帯損傷"),
                        cat("high_ankle", "高位足関節捻挫"),
                        cat("footballers_ankle", "フットボーラーズアンクル"),
                    ],
                ),
                region(
                    "athlete_hip",
                    "股関節 (Hip)",
                    vec![cat("groin_pain", "鼠径部痛症候群"), cat("fais", "FAIS")],
                ),
                region(
                    "athlete_shoulder",
                    "肩 (Shoulder)",
                    vec![
                        cat("rotator_cuff", "腱板損傷"),
                        cat("impingement", "インピンジメント症候群"),
                        cat("biceps_tendonitis", "上腕二頭筋長頭腱炎"),
                    ],
                ),
            ],
            interview_frames: vec![
                frame("A. 主訴と経過", &["受傷直後の対応", "再発かどうか"]),
                frame("B. 受傷機転・誘因", &["競技動作の詳細", "接触の有無", "フィールドの状態"]),
                frame(
                    "C. 痛み・症状の性質",
                    &["プレー続行可否", "ロッキング・不安定感", "腫脹のスピード"],
                ),
                frame("D. 機能障害・生活影響", &["パフォーマンス低下", "フォームの崩れ", "恐怖心"]),
                frame("E. 背景因子", &["競技レベル", "練習量・頻度", "大事な試合の予定"]),
                frame("F. レッドフラッグ", &["完全断裂の疑い", "神経損傷合併", "コンパートメント"]),
                frame("G. 患者ニーズ・ゴール", &["早期復帰 (RTP)", "パフォーマンス向上", "再発予防"]),
            ],
        },
        Archetype {
            id: "worker_adult".to_string(),
            label: "労働者・青壮年 (Worker/Adult)".to_string(),
            description:
                "労働災害や職業病（デスクワークの腰痛、肉体労働の外傷）。日常生活や仕事への早期復帰が鍵。"
                    .to_string(),
            tone: "Busy worker, worried about sick leave and income.".to_string(),
            navigation_groups: vec![
                region(
                    "worker_lumbar",
                    "腰 (Lumbar)",
                    vec![
                        cat("lbp", "腰痛症"),
                        cat("hernia", "椎間板ヘルニア"),
                        cat("acute_lbp", "ぎっくり腰"),
                    ],
                ),
                region(
                    "worker_upper",
                    "頸・肩・上肢 (Neck/Upper Limb)",
                    vec![
                        cat("cervicobrachial", "頸肩腕症候群"),
                        cat("tos", "胸郭出口症候群"),
                        cat("tennis_elbow", "テニス肘"),
                        cat("de_quervain", "ドケルバン病"),
                        cat("cts", "手根管症候群"),
                        cat("cubital_tunnel", "肘部管症候群"),
                    ],
                ),
            ],
            interview_frames: vec![
                frame("A. 主訴と経過", &["仕事中の発生", "徐々に悪化か"]),
                frame("B. 受傷機転・誘因", &["作業姿勢", "反復動作", "重量物挙上"]),
                frame("C. 痛み・症状の性質", &["しびれの有無", "安静時痛", "夜間痛"]),
                frame("D. 機能障害・生活影響", &["仕事への支障", "ADL（着替え・洗顔）", "睡眠障害"]),
                frame("E. 背景因子", &["職業・職種", "勤続年数", "利き手", "喫煙歴"]),
                frame("F. レッドフラッグ", &["悪性腫瘍", "感染", "脊髄症状（膀胱直腸障害）"]),
                frame(
                    "G. 患者ニーズ・ゴール",
                    &["就労復帰", "休業補償の不安解消", "配置転換の要否"],
                ),
            ],
        },
        Archetype {
            id: "elderly".to_string(),
            label: "高齢者 (Elderly)".to_string(),
            description: "変性疾患、転倒骨折、レッドフラッグ（悪性腫瘍等）。".to_string(),
            tone: "Slow talker, multiple complaints, forgets details.".to_string(),
            navigation_groups: vec![
                region(
                    "elderly_trauma",
                    "転倒・外傷 (Trauma)",
                    vec![
                        cat("femoral_neck_fx", "大腿骨近位部骨折"),
                        cat("distal_radius_fx", "橈骨遠位端骨折"),
                        cat("compression_fx", "脊椎圧迫骨折"),
                    ],
                ),
                region(
                    "elderly_degenerative",
                    "変性疾患 (Degenerative)",
                    vec![
                        cat("knee_oa", "変形性膝関節症"),
                        cat("hip_oa", "変形性股関節症"),
                        cat("spinal_stenosis", "脊柱管狭窄症"),
                    ],
                ),
                region(
                    "elderly_nerve",
                    "神経・二次障害 (Nerve)",
                    vec![
                        cat("cts", "手根管症候群"),
                        cat("cubital_tunnel", "肘部管症候群"),
                    ],
                ),
            ],
            interview_frames: vec![
                frame("A. 主訴と経過", &["いつからか（慢性/急性）", "認知機能の影響"]),
                frame("B. 受傷機転・誘因", &["転倒歴の詳細", "目撃者の有無", "ふらつき"]),
                frame("C. 痛み・症状の性質", &["関連痛", "日内変動", "天候による変化"]),
                frame("D. 機能障害・生活影響", &["ADL（排泄・入浴）", "自立度", "歩行能力"]),
                frame("E. 背景因子", &["既往歴（骨粗鬆症他）", "服薬状況", "社会的孤立"]),
                frame("F. レッドフラッグ", &["悪性腫瘍の転移", "化膿性関節炎", "病的骨折"]),
                frame("G. 患者ニーズ・ゴール", &["生活の質の維持", "寝たきり防止", "介護負担軽減"]),
            ],
        },
    ]
});

/// Shared region list, used when an archetype carries no navigation groups.
pub static BODY_REGIONS: LazyLock<Vec<BodyRegion>> = LazyLock::new(|| {
    vec![
        region(
            "knee",
            "膝関節 (Knee)",
            vec![
                cat_with_subs(
                    "knee_trauma",
                    "外傷 (Acute Trauma)",
                    vec![
                        cat("acl", "ACL (前十字靭帯)"),
                        cat("mcl", "MCL (内側側副靭帯)"),
                        cat("meniscus", "半月板 (Meniscus)"),
                        cat("fracture", "骨折 (Fracture)"),
                    ],
                ),
                cat_with_subs(
                    "knee_sports",
                    "スポーツ障害 (Overuse)",
                    vec![
                        cat("osgood", "オスグッド"),
                        cat("jumper", "ジャンパー膝"),
                        cat("itb", "腸脛靭帯炎"),
                    ],
                ),
                cat("knee_oa", "変性 (OA/Chronic)"),
                cat("knee_red", "Red Flags"),
            ],
        ),
        region(
            "shoulder",
            "肩関節 (Shoulder)",
            vec![
                cat("shoulder_trauma", "外傷"),
                cat("shoulder_stiff", "拘縮 (五十肩)"),
            ],
        ),
        region("lumbar", "腰部 (Lumbar)", vec![]),
        region("ankle", "足関節 (Ankle)", vec![]),
    ]
});

pub fn archetype(id: &str) -> Option<&'static Archetype> {
    ARCHETYPES.iter().find(|a| a.id == id)
}

/// The region list that applies to an archetype: its own navigation groups
/// when present, otherwise the shared body regions.
pub fn active_regions(archetype: &'static Archetype) -> &'static [BodyRegion] {
    if archetype.navigation_groups.is_empty() {
        BODY_REGIONS.as_slice()
    } else {
        archetype.navigation_groups.as_slice()
    }
}

pub fn resolve_region(archetype: &'static Archetype, region_id: &str) -> Option<&'static BodyRegion> {
    active_regions(archetype).iter().find(|r| r.id == region_id)
}

/// Display label for a category within a region. Unresolved categories fall
/// back to the raw id so an unknown classification never fails hard.
pub fn category_label(region: &BodyRegion, category_id: &str) -> String {
    fn find(categories: &[Category], id: &str) -> Option<String> {
        for c in categories {
            if c.id == id {
                return Some(c.label.clone());
            }
            if let Some(label) = find(&c.subcategories, id) {
                return Some(label);
            }
        }
        None
    }
    find(&region.categories, category_id).unwrap_or_else(|| category_id.to_string())
}

/// Display label for an archetype id, falling back to the raw id.
pub fn archetype_label(archetype_id: &str) -> String {
    archetype(archetype_id)
        .map(|a| a.label.clone())
        .unwrap_or_else(|| archetype_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archetypes_have_unique_ids() {
        let mut ids: Vec<&str> = ARCHETYPES.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn navigation_groups_override_shared_regions() {
        let athlete = archetype("athlete").unwrap();
        let regions = active_regions(athlete);
        assert!(regions.iter().any(|r| r.id == "athlete_ankle"));
        assert!(!regions.iter().any(|r| r.id == "knee"));
    }

    #[test]
    fn category_resolution_searches_subcategories() {
        let knee = BODY_REGIONS.iter().find(|r| r.id == "knee").unwrap();
        assert_eq!(category_label(knee, "acl"), "ACL (前十字靭帯)");
        assert_eq!(category_label(knee, "knee_oa"), "変性 (OA/Chronic)");
    }

    #[test]
    fn unknown_category_falls_back_to_raw_id() {
        let knee = BODY_REGIONS.iter().find(|r| r.id == "knee").unwrap();
        assert_eq!(category_label(knee, "not_a_category"), "not_a_category");
    }

    #[test]
    fn unknown_archetype_label_falls_back_to_raw_id() {
        assert_eq!(archetype_label("mystery"), "mystery");
    }
}
