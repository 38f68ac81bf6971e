fn main() {
    upl_sv::run_client();
}
