mod loading_tests;
